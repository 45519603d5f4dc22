/// Expand `${VAR}` and `${VAR:-fallback}` placeholders in raw config text.
///
/// A variable that is unset (and has no fallback) keeps its placeholder so the
/// parse error, if any, points at the original text.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated: keep the remainder verbatim.
            out.push_str(&rest[start..]);
            return out;
        };

        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        match (name.is_empty(), lookup(name), fallback) {
            (false, Some(val), _) => out.push_str(&val),
            (false, None, Some(fallback)) => out.push_str(fallback),
            _ => {
                out.push_str("${");
                out.push_str(body);
                out.push('}');
            },
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake(name: &str) -> Option<String> {
        match name {
            "WAGATE_PORT" => Some("4000".into()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(substitute_with("port = ${WAGATE_PORT}", fake), "port = 4000");
    }

    #[test]
    fn uses_fallback_for_unset_var() {
        assert_eq!(
            substitute_with("bind = \"${WAGATE_BIND:-0.0.0.0}\"", fake),
            "bind = \"0.0.0.0\""
        );
    }

    #[test]
    fn set_but_empty_wins_over_fallback() {
        assert_eq!(substitute_with("[${EMPTY:-x}]", fake), "[]");
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_with("${WAGATE_NONEXISTENT_XYZ}", fake),
            "${WAGATE_NONEXISTENT_XYZ}"
        );
    }

    #[test]
    fn keeps_unterminated_placeholder() {
        assert_eq!(substitute_with("a ${WAGATE_PORT", fake), "a ${WAGATE_PORT");
    }

    #[test]
    fn reads_process_environment() {
        // PATH is present in every test environment.
        assert!(!substitute_env("${PATH}").contains("${"));
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
