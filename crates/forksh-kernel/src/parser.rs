//! Pipeline tree builder.
//!
//! Folds the token stream left to right over an explicit stack of frames,
//! one per open group:
//!
//! ```text
//!   word  → append to the current stage's leaf
//!   (     → push a new frame (only at the start of a stage)
//!   )     → pop the frame; its tree becomes the enclosing frame's stage
//!   > |   → close the current stage, start an empty one
//! ```
//!
//! A frame's stages fold to the right, so `a > b > c` is `(a > (b > c))`
//! while `(a > b) > c` is `((a > b) > c)`.

use crate::ast::PipelineNode;
use crate::error::ParseError;
use crate::lexer::{tokenize, Token};

#[derive(Default)]
enum Stage {
    #[default]
    Empty,
    Words(Vec<String>),
    Group(PipelineNode),
}

impl Stage {
    fn into_node(self) -> Option<PipelineNode> {
        match self {
            Stage::Empty => None,
            Stage::Words(words) => Some(PipelineNode::Leaf(words)),
            Stage::Group(node) => Some(node),
        }
    }
}

#[derive(Default)]
struct Frame {
    stages: Vec<PipelineNode>,
    current: Stage,
}

impl Frame {
    fn word(&mut self, word: String) -> Result<(), ParseError> {
        match &mut self.current {
            Stage::Empty => self.current = Stage::Words(vec![word]),
            Stage::Words(words) => words.push(word),
            Stage::Group(_) => return Err(ParseError::WordAfterGroup(word)),
        }
        Ok(())
    }

    fn pipe(&mut self) -> Result<(), ParseError> {
        let stage = std::mem::take(&mut self.current)
            .into_node()
            .ok_or(ParseError::EmptyStage)?;
        self.stages.push(stage);
        Ok(())
    }

    fn finish(mut self) -> Result<PipelineNode, ParseError> {
        self.pipe()?;
        self.stages
            .into_iter()
            .rev()
            .reduce(|right, left| PipelineNode::pipe(left, right))
            .ok_or(ParseError::EmptyStage)
    }
}

/// Parse a command line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<PipelineNode>, ParseError> {
    let tokens = tokenize(line)?;
    if tokens.is_empty() {
        return Ok(None);
    }

    let mut stack = vec![Frame::default()];
    for token in tokens {
        let Some(top) = stack.last_mut() else {
            return Err(ParseError::UnexpectedClose);
        };
        match token {
            Token::Word(word) => top.word(word)?,
            Token::Op(">" | "|") => top.pipe()?,
            Token::Op("(") => {
                if !matches!(top.current, Stage::Empty) {
                    return Err(ParseError::MisplacedGroup);
                }
                stack.push(Frame::default());
            }
            Token::Op(")") => {
                if stack.len() == 1 {
                    return Err(ParseError::UnexpectedClose);
                }
                let group = stack.pop().ok_or(ParseError::UnexpectedClose)?.finish()?;
                if let Some(parent) = stack.last_mut() {
                    parent.current = Stage::Group(group);
                }
            }
            Token::Op(op) => return Err(ParseError::UnsupportedOperator(op.to_string())),
        }
    }

    if stack.len() > 1 {
        return Err(ParseError::UnclosedGroup);
    }
    let root = stack.pop().ok_or(ParseError::EmptyStage)?;
    root.finish().map(Some)
}
