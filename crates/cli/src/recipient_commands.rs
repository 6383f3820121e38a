use {
    anyhow::Result,
    clap::{Subcommand, ValueEnum},
    mucnotify_transport::{RoomTarget, validate_room_address},
};

#[derive(Clone, Copy, ValueEnum)]
pub enum Format {
    /// `<muc-recipient>` element.
    Xml,
    /// `room|password|nickname`.
    Delimited,
}

#[derive(Subcommand)]
pub enum RecipientAction {
    /// Print a room target in its stored form.
    Encode {
        #[arg(long)]
        room: String,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        nickname: Option<String>,
        #[arg(long, value_enum, default_value = "xml")]
        format: Format,
    },
    /// Read a stored room target and print its fields.
    Decode {
        /// Stored form; an empty value yields an empty target.
        input: String,
        #[arg(long, value_enum, default_value = "xml")]
        format: Format,
    },
}

pub fn handle_recipient(action: RecipientAction) -> Result<()> {
    match action {
        RecipientAction::Encode {
            room,
            password,
            nickname,
            format,
        } => {
            let target = RoomTarget::new(room.trim())
                .with_password(password.as_deref())
                .with_nickname(nickname.as_deref());
            target.validate()?;
            println!("{}", encode(&target, format));
            Ok(())
        },
        RecipientAction::Decode { input, format } => {
            let target = decode(&input, format);
            println!("room: {}", target.room_address);
            println!(
                "password: {}",
                if target.password().is_some() {
                    "(set)"
                } else {
                    "(none)"
                }
            );
            println!("nickname: {}", target.nickname().unwrap_or("(none)"));
            Ok(())
        },
    }
}

pub fn validate(room: &str) -> Result<()> {
    validate_room_address(room.trim())?;
    println!("{} is a valid room address", room.trim());
    Ok(())
}

fn encode(target: &RoomTarget, format: Format) -> String {
    match format {
        Format::Xml => target.to_xml(),
        Format::Delimited => target.to_delimited(),
    }
}

fn decode(input: &str, format: Format) -> RoomTarget {
    match format {
        Format::Xml => RoomTarget::from_xml(input),
        Format::Delimited => RoomTarget::from_delimited(input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_delimited() {
        let target = RoomTarget::new("ops@conference.example.com").with_nickname(Some("CI"));
        let stored = encode(&target, Format::Delimited);
        let back = decode(&stored, Format::Delimited);
        assert_eq!(back.room_address, "ops@conference.example.com");
        assert_eq!(back.nickname(), Some("CI"));
    }

    #[test]
    fn validate_reports_bad_format() {
        let err = validate("roomname").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid format, should be roomname@conference-server-url"
        );
        assert!(validate("roomname@conference.example.com").is_ok());
    }
}
