//! Binding read/write extraction from cell source text.
//!
//! Scans cell source to find the names of bindings the cell reads and
//! writes. This is what feeds the dependency graph: a cell that writes `x`
//! becomes the producer of `x`, and every cell that reads `x` gains an edge
//! to it.
//!
//! This is a light scanner, not a parser. It works line by line over source
//! with string literals and comments stripped:
//! - top-level assignments (`let x = ...`, `x = ...`, `x += ...`) and
//!   `fn name(...)` definitions are writes
//! - any other identifier is a read, unless the cell itself defined it on an
//!   earlier line (locals such as loop variables and fn params never escape)
//!
//! Edits may carry an explicit declared [`Analysis`] instead, which bypasses
//! the scanner entirely.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// The binding names a cell reads and writes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub reads: BTreeSet<String>,
    pub writes: BTreeSet<String>,
}

impl Analysis {
    pub fn new(
        reads: impl IntoIterator<Item = impl Into<String>>,
        writes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Analysis {
        Analysis {
            reads: reads.into_iter().map(Into::into).collect(),
            writes: writes.into_iter().map(Into::into).collect(),
        }
    }
}

/// Extract the reads/writes of a cell from its source text.
pub fn analyze(source: &str) -> Analysis {
    let stripped = strip_strings_and_comments(source);

    let mut analysis = Analysis::default();
    // Names defined by earlier lines of this cell; uses of these are not
    // reads of another cell's binding.
    let mut defined: BTreeSet<String> = BTreeSet::new();

    for line in stripped.lines() {
        let mut rhs = line;

        if let Some(caps) = fn_def_re().captures(line) {
            let name = caps["name"].to_string();
            analysis.writes.insert(name.clone());
            defined.insert(name);
            for param in caps["params"].split(',') {
                let param = param.trim();
                if !param.is_empty() {
                    defined.insert(param.to_string());
                }
            }
            continue;
        }

        let target = assign_re().captures(line).and_then(|caps| {
            let after = &line[caps.name("op").map_or(line.len(), |m| m.end())..];
            // `=` followed by `=` is a comparison, not an assignment.
            if &caps["op"] == "=" && after.starts_with('=') {
                return None;
            }
            rhs = after;
            Some(caps["name"].to_string())
        });

        if let Some(caps) = for_re().captures(line) {
            defined.insert(caps["var"].to_string());
        }

        for ident in ident_re().find_iter(rhs) {
            let name = ident.as_str();
            if is_keyword(name) || defined.contains(name) {
                continue;
            }
            analysis.reads.insert(name.to_string());
        }

        if let Some(name) = target {
            analysis.writes.insert(name.clone());
            // Defined only after its own RHS: `x = x + 1` still reads `x`.
            defined.insert(name);
        }
    }

    analysis
}

fn assign_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Compound assignment also counts as a write; `==` is filtered by
        // the caller since the regex crate has no lookahead.
        Regex::new(r"^\s*(?:let\s+|const\s+)?(?<name>[A-Za-z_][A-Za-z0-9_]*)\s*(?<op>[+\-*/]?=)")
            .expect("assignment regex must compile")
    })
}

fn fn_def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*fn\s+(?<name>[A-Za-z_][A-Za-z0-9_]*)\s*\((?<params>[^)]*)\)")
            .expect("fn definition regex must compile")
    })
}

fn for_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bfor\s+(?<var>[A-Za-z_][A-Za-z0-9_]*)\s+in\b")
            .expect("for loop regex must compile")
    })
}

fn ident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\b").expect("identifier regex must compile")
    })
}

fn is_keyword(name: &str) -> bool {
    matches!(
        name,
        "let"
            | "const"
            | "fn"
            | "if"
            | "else"
            | "switch"
            | "while"
            | "loop"
            | "for"
            | "in"
            | "do"
            | "until"
            | "break"
            | "continue"
            | "return"
            | "throw"
            | "try"
            | "catch"
            | "import"
            | "export"
            | "as"
            | "global"
            | "private"
            | "true"
            | "false"
            | "this"
            | "type_of"
            | "print"
            | "debug"
    )
}

/// Blank out string literal contents and comments so identifiers inside them
/// are never mistaken for binding references.
fn strip_strings_and_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    while let Some(ch) = chars.next() {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                in_string = None;
            }
            out.push(if ch == '\n' { '\n' } else { ' ' });
            continue;
        }
        match ch {
            '"' | '\'' => {
                in_string = Some(ch);
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'/') => {
                // Line comment: drop the rest of the line.
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            _ => out.push(ch),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_let_assignment_is_a_write() {
        let a = analyze("let x = 1;");
        assert_eq!(names(&a.writes), vec!["x"]);
        assert!(a.reads.is_empty());
    }

    #[test]
    fn test_rhs_identifiers_are_reads() {
        let a = analyze("let y = x + offset;");
        assert_eq!(names(&a.reads), vec!["offset", "x"]);
        assert_eq!(names(&a.writes), vec!["y"]);
    }

    #[test]
    fn test_expression_only_cell_reads() {
        let a = analyze("y * 2");
        assert_eq!(names(&a.reads), vec!["y"]);
        assert!(a.writes.is_empty());
    }

    #[test]
    fn test_locals_defined_earlier_are_not_reads() {
        let a = analyze("let a = 1;\nlet b = a + x;");
        assert_eq!(names(&a.reads), vec!["x"]);
        assert_eq!(names(&a.writes), vec!["a", "b"]);
    }

    #[test]
    fn test_self_assignment_reads_its_own_name() {
        // `x = x + 1` reads the prior value, which makes it a self-cycle
        // once the graph sees both sides.
        let a = analyze("x = x + 1;");
        assert_eq!(names(&a.reads), vec!["x"]);
        assert_eq!(names(&a.writes), vec!["x"]);
    }

    #[test]
    fn test_string_literals_and_comments_ignored() {
        let a = analyze("let s = \"uses x inside\"; // reads y\n/* z */\nlet t = s;");
        assert!(a.reads.is_empty());
        assert_eq!(names(&a.writes), vec!["s", "t"]);
    }

    #[test]
    fn test_fn_definition_writes_name_not_params() {
        let a = analyze("fn double(n) { n * 2 }\nlet v = double(base);");
        assert_eq!(names(&a.reads), vec!["base"]);
        assert_eq!(names(&a.writes), vec!["double", "v"]);
    }

    #[test]
    fn test_loop_variable_is_local() {
        let a = analyze("let total = 0;\nfor item in items { total += item; }");
        assert_eq!(names(&a.reads), vec!["items"]);
        assert_eq!(names(&a.writes), vec!["total"]);
    }

    #[test]
    fn test_comparison_is_not_assignment() {
        let a = analyze("x == y");
        assert_eq!(names(&a.reads), vec!["x", "y"]);
        assert!(a.writes.is_empty());
    }
}
