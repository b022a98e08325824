//! Pipeline tree.

use std::fmt;

/// A parsed command line: command invocations joined by pipes.
///
/// Grouping only affects how the tree associates; `a > b > c` and
/// `(a > b) > c` run identically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineNode {
    /// Command name followed by its arguments. Never empty.
    Leaf(Vec<String>),
    /// `left`'s output feeds `right`'s input.
    Pipe {
        left: Box<PipelineNode>,
        right: Box<PipelineNode>,
    },
}

impl PipelineNode {
    pub fn leaf<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PipelineNode::Leaf(words.into_iter().map(Into::into).collect())
    }

    pub fn pipe(left: PipelineNode, right: PipelineNode) -> Self {
        PipelineNode::Pipe {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Leaves in execution order.
    pub fn leaves(&self) -> Vec<&[String]> {
        match self {
            PipelineNode::Leaf(words) => vec![words.as_slice()],
            PipelineNode::Pipe { left, right } => {
                let mut leaves = left.leaves();
                leaves.extend(right.leaves());
                leaves
            }
        }
    }
}

/// Renders pipes fully parenthesized, words re-quoted where needed.
impl fmt::Display for PipelineNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineNode::Leaf(words) => {
                for (i, word) in words.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write_word(f, word)?;
                }
                Ok(())
            }
            PipelineNode::Pipe { left, right } => write!(f, "({left} > {right})"),
        }
    }
}

fn write_word(f: &mut fmt::Formatter<'_>, word: &str) -> fmt::Result {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| !c.is_whitespace() && !"'\"\\()<>|&;".contains(c));
    if plain {
        f.write_str(word)
    } else {
        write!(f, "'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_when_needed() {
        let node = PipelineNode::pipe(
            PipelineNode::leaf(["echo", r#"{"@id":1}"#]),
            PipelineNode::leaf(["write", "--@id", "w1"]),
        );
        assert_eq!(node.to_string(), r#"(echo '{"@id":1}' > write --@id w1)"#);
    }

    #[test]
    fn test_leaves_in_order() {
        let node = PipelineNode::pipe(
            PipelineNode::leaf(["a"]),
            PipelineNode::pipe(PipelineNode::leaf(["b"]), PipelineNode::leaf(["c"])),
        );
        let names: Vec<&str> = node.leaves().iter().map(|l| l[0].as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }
}
