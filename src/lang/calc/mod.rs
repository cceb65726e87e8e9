//! `calc`: the built-in reference language
//!
//! A file is a sequence of top-level declarations. A declaration starts on a
//! line with no leading whitespace; indented lines and blank lines after it
//! continue it. Lines starting with `#` are comments.
//!
//! ```text
//! # inputs
//! width = 12
//! height = 5
//! area =
//!   width * height
//! "area is " + str(area)
//! ```

pub mod eval;
pub mod syntax;

pub use eval::{CalcEnv, CalcEvaluator, Value};

use crate::lang::{Declaration, Parsed, Parser};

use syntax::{parse_item, Item};

/// A valid calc declaration
#[derive(Debug, Clone, PartialEq)]
pub struct CalcDecl {
    source: String,
    pub item: Item,
    free: Vec<String>,
}

impl Declaration for CalcDecl {
    fn source(&self) -> &str {
        &self.source
    }

    fn free_vars(&self) -> Vec<String> {
        self.free.clone()
    }

    fn bound_vars(&self) -> Vec<String> {
        self.item.name.iter().cloned().collect()
    }
}

/// Parser for calc files
#[derive(Debug, Clone, Default)]
pub struct CalcParser;

impl CalcParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for CalcParser {
    type Decl = CalcDecl;

    fn parse(&self, text: &str) -> Vec<Parsed<CalcDecl>> {
        split_items(text)
            .into_iter()
            .map(|source| match parse_item(&source) {
                Ok(item) => Parsed::Decl(CalcDecl {
                    free: item.expr.free_vars(),
                    source,
                    item,
                }),
                Err(message) => Parsed::Error { source, message },
            })
            .collect()
    }
}

/// Split a file into the source texts of its top-level items
fn split_items(text: &str) -> Vec<String> {
    let mut items: Vec<Vec<&str>> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            continue;
        }
        let continues = trimmed.is_empty() || trimmed.len() != line.len();
        if continues {
            if let Some(current) = items.last_mut() {
                current.push(line);
                continue;
            }
            if trimmed.is_empty() {
                continue;
            }
        }
        items.push(vec![line]);
    }

    items
        .into_iter()
        .map(|lines| lines.join("\n").trim_end().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(text: &str) -> Vec<String> {
        CalcParser::new()
            .parse(text)
            .into_iter()
            .map(|parsed| match parsed {
                Parsed::Decl(decl) => decl.source().to_string(),
                Parsed::Error { source, .. } => source,
            })
            .collect()
    }

    #[test]
    fn test_split_top_level_items() {
        let text = "x = 1\ny =\n  x + 1\n\n# comment\nz = 3\n";
        assert_eq!(sources(text), vec!["x = 1", "y =\n  x + 1", "z = 3"]);
    }

    #[test]
    fn test_leading_blank_and_indented_lines() {
        assert_eq!(sources("\n\n  a = 1\nb = 2"), vec!["  a = 1", "b = 2"]);
        assert!(sources("").is_empty());
        assert!(sources("# only a comment\n\n").is_empty());
    }

    #[test]
    fn test_free_and_bound_vars() {
        let items = CalcParser::new().parse("y = x + x * w\nx + 1");
        let Parsed::Decl(first) = &items[0] else {
            panic!("expected a declaration");
        };
        assert_eq!(first.free_vars(), vec!["x", "w"]);
        assert_eq!(first.bound_vars(), vec!["y"]);

        let Parsed::Decl(second) = &items[1] else {
            panic!("expected a declaration");
        };
        assert!(second.bound_vars().is_empty());
    }

    #[test]
    fn test_parse_error_item_keeps_source() {
        let items = CalcParser::new().parse("a = 1\nb = (2 +\nc = 3");
        assert_eq!(items.len(), 3);
        match &items[1] {
            Parsed::Error { source, message } => {
                assert_eq!(source, "b = (2 +");
                assert_eq!(message, "unexpected end of input");
            }
            other => panic!("expected a parse error, got {:?}", other),
        }
    }
}
