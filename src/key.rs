//! Store key composition.
//!
//! A key is `app|endpoint|limit|caller` with `\` and `|` escaped inside each
//! component, so two keys are equal exactly when all four components are.
//! Keys are pure functions of their inputs and stay stable across restarts.

/// Separator between key components.
pub const SEPARATOR: char = '|';

fn push_escaped(out: &mut String, component: &str) {
    for c in component.chars() {
        if c == '\\' || c == SEPARATOR {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Compose a key from arbitrary components.
pub fn compose<'a>(components: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for (i, component) in components.into_iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        push_escaped(&mut out, component);
    }
    out
}

/// Key for one limit on one endpoint for one caller.
pub fn derive(app: &str, endpoint: &str, limit_identity: &str, caller: &str) -> String {
    compose([app, endpoint, limit_identity, caller])
}

/// Key for a message limiter.
///
/// Always five components, so it can never equal a four-component endpoint
/// key. A present context is prefixed with `=` to keep `Some("")` apart
/// from `None`.
pub fn derive_message(app: &str, limit_identity: &str, caller: &str, context: Option<&str>) -> String {
    let context = context.map(|c| format!("={c}")).unwrap_or_default();
    compose([app, "message", limit_identity, caller, context.as_str()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_components_join() {
        assert_eq!(derive("app", "index", "1-2.0", "127.0.0.1"), "app|index|1-2.0|127.0.0.1");
    }

    #[test]
    fn separators_inside_components_do_not_collide() {
        let a = derive("app", "a|b", "1-1.0", "c");
        let b = derive("app", "a", "b|1-1.0", "c");
        assert_ne!(a, b);
        assert_eq!(a, r"app|a\|b|1-1.0|c");
    }

    #[test]
    fn escapes_backslash() {
        let a = derive("app", r"x\", "1-1.0", "c");
        let b = derive("app", "x", r"\|1-1.0", "c");
        assert_ne!(a, b);
    }

    #[test]
    fn stable_for_equal_inputs() {
        assert_eq!(derive("a", "b", "c", "d"), derive("a", "b", "c", "d"));
    }

    #[test]
    fn message_keys_differ_by_context() {
        let none = derive_message("app", "5-1.0", "u1", None);
        let room = derive_message("app", "5-1.0", "u1", Some("room-1"));
        assert_ne!(none, room);
        assert_eq!(room, "app|message|5-1.0|u1|=room-1");
        assert_ne!(none, derive_message("app", "5-1.0", "u1", Some("")));
        assert_ne!(none, derive("app", "message", "5-1.0", "u1"));
    }
}
