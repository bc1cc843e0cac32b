//! Rewrite templates.

use super::MatchNode;

fn is_metavar_start(c: char) -> bool {
    c.is_ascii_uppercase() || c == '_'
}

fn is_metavar_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'
}

/// Substitute `$NAME` and `$$$NAME` in `template` with captures of `node`.
///
/// Unknown `$NAME` metavariables are left as written; a `$$$NAME` that
/// captured nothing renders as empty text.
pub fn render_template(template: &str, node: &MatchNode) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(index) = rest.find('$') {
        out.push_str(&rest[..index]);
        let tail = &rest[index..];
        let dollars = tail.chars().take_while(|c| *c == '$').count();
        let after = &tail[dollars..];
        let name_len = if after.chars().next().is_some_and(is_metavar_start) {
            after.find(|c: char| !is_metavar_char(c)).unwrap_or(after.len())
        } else {
            0
        };
        let name = &after[..name_len];

        match node.get_match(name) {
            Some(capture) if name_len > 0 && (dollars == 1 || dollars == 3) => {
                out.push_str(capture.text());
            }
            None if name_len > 0 && dollars == 3 => {}
            _ => out.push_str(&tail[..dollars + name_len]),
        }
        rest = &after[name_len..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template() {
        let node = MatchNode::new("console.log(a, b)", 0..17)
            .with_match("ARGS", MatchNode::new("a, b", 12..16))
            .with_match("A", MatchNode::new("a", 12..13));
        assert_eq!(render_template("console.error($$$ARGS)", &node), "console.error(a, b)");
        assert_eq!(render_template("$UNKNOWN($A)", &node), "$UNKNOWN(a)");
        assert_eq!(render_template("f($$$REST)", &node), "f()");
        assert_eq!(render_template("cost: $5", &node), "cost: $5");
    }
}
