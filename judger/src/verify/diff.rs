use difference::{Changeset, Difference};

/// Line diff of two texts, prefixing lines with `  `, `- ` or `+ `.
pub fn diff<'a>(got: &'a str, expected: &'a str) -> String {
    let Changeset { diffs, .. } = Changeset::new(got, expected, "\n");

    fn make_diff_line(ln_diff: &Difference) -> String {
        match ln_diff {
            Difference::Same(ln) => prefix_lines("  ", ln),
            Difference::Rem(ln) => prefix_lines("- ", ln),
            Difference::Add(ln) => prefix_lines("+ ", ln),
        }
    }

    diffs
        .iter()
        .map(make_diff_line)
        .collect::<Vec<String>>()
        .join("\n")
}

fn prefix_lines(prefix: &str, s: &str) -> String {
    s.lines()
        .map(|l| format!("{}{}", prefix, l))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff() {
        let got = "{\"x\":1}\n{\"x\":3}";
        let expected = "{\"x\":1}\n{\"x\":2}";
        let d = diff(got, expected);
        let lines: Vec<_> = d.lines().collect();
        assert_eq!(lines.len(), 3, "{}", d);
        assert_eq!(lines[0], "  {\"x\":1}");
        assert!(lines.contains(&"- {\"x\":3}"), "{}", d);
        assert!(lines.contains(&"+ {\"x\":2}"), "{}", d);
    }

    #[test]
    fn test_diff_same() {
        assert_eq!(diff("a\nb", "a\nb"), "  a\n  b");
    }
}
