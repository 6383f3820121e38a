use std::collections::HashMap;

/// Replace `${ENV_VAR}` placeholders in config string values.
///
/// Unresolvable variables are left as-is.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

/// Replace `${name}` placeholders from `vars`, falling back to the process
/// environment.
///
/// This is the variable-substitution service applied to recipient fields
/// (room address, room password, nickname) at the dispatch boundary.
pub fn substitute_vars(input: &str, vars: &HashMap<String, String>) -> String {
    substitute_with(input, |name| {
        vars.get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
    })
}

fn substitute_with(input: &str, resolve: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            if closed && !var_name.is_empty() {
                match resolve(&var_name) {
                    Some(val) => result.push_str(&val),
                    None => {
                        // Leave unresolved placeholder as-is.
                        result.push_str("${");
                        result.push_str(&var_name);
                        result.push('}');
                    },
                }
            } else {
                // Malformed, emit literal.
                result.push_str("${");
                result.push_str(&var_name);
                if closed {
                    result.push('}');
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}
