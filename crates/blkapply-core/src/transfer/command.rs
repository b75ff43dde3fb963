//! Transfer-list command parsing.
//!
//! One line of the transfer list becomes one [`Command`]: a verb, the
//! expected SHA-256 digest of whatever content the verb names, the operand
//! block sets, and (for diff verbs) a byte window into the patch stream.
//!
//! Per-verb line grammar:
//!
//! ```text
//! new     <hash> <tgt>
//! zero    <hash> <tgt>
//! move    <hash> <src> <blocks> <tgt>
//! bsdiff  <hash> <src> <tgt> <offset> <len>
//! imgdiff <hash> <src> <tgt> <offset> <len>
//! stash   <hash> <range>
//! free    <hash>
//! last
//! ```

use crate::block::BlockSet;
use crate::constants::SHA256_HEX_LEN;
use crate::error::{Error, Result};

/// The closed set of transfer-list verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Write fresh content from the new-data stream.
    New,
    /// Zero-fill the target blocks.
    Zero,
    /// Copy source blocks to target blocks.
    Move,
    /// Apply a block diff to source blocks, write result to target.
    Bsdiff,
    /// Apply an image diff to source blocks, write result to target.
    Imgdiff,
    /// Preserve source blocks in the stash store.
    Stash,
    /// Release a stash entry.
    Free,
    /// End-of-list sentinel; recognized but never executed.
    Last,
}

impl CommandKind {
    fn from_verb(verb: &str) -> Option<Self> {
        match verb {
            "new" => Some(Self::New),
            "zero" => Some(Self::Zero),
            "move" => Some(Self::Move),
            "bsdiff" => Some(Self::Bsdiff),
            "imgdiff" => Some(Self::Imgdiff),
            "stash" => Some(Self::Stash),
            "free" => Some(Self::Free),
            "last" => Some(Self::Last),
            _ => None,
        }
    }

    /// Verbs that write payload blocks to the device.
    pub fn writes_payload(self) -> bool {
        matches!(
            self,
            Self::New | Self::Zero | Self::Move | Self::Bsdiff | Self::Imgdiff
        )
    }
}

/// One parsed transfer-list command. Immutable after parse.
#[derive(Debug, Clone)]
pub struct Command {
    kind: CommandKind,
    line: String,
    hash: String,
    src: Option<BlockSet>,
    tgt: Option<BlockSet>,
    src_blocks: Option<u64>,
    patch_offset: Option<u64>,
    patch_len: Option<u64>,
}

impl Command {
    /// Parse one transfer-list line.
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next().ok_or_else(|| Error::Command {
            message: "empty command line".into(),
        })?;
        let kind = CommandKind::from_verb(verb).ok_or_else(|| Error::Command {
            message: format!("unknown verb {:?}", verb),
        })?;

        let mut cmd = Command {
            kind,
            line: line.to_string(),
            hash: String::new(),
            src: None,
            tgt: None,
            src_blocks: None,
            patch_offset: None,
            patch_len: None,
        };

        if kind != CommandKind::Last {
            cmd.hash = Self::hash_token(&mut tokens, line)?;
        }

        match kind {
            CommandKind::New | CommandKind::Zero => {
                cmd.tgt = Some(Self::range_token(&mut tokens, line)?);
            }
            CommandKind::Move => {
                cmd.src = Some(Self::range_token(&mut tokens, line)?);
                cmd.src_blocks = Some(Self::int_token(&mut tokens, line)?);
                cmd.tgt = Some(Self::range_token(&mut tokens, line)?);
            }
            CommandKind::Bsdiff | CommandKind::Imgdiff => {
                cmd.src = Some(Self::range_token(&mut tokens, line)?);
                cmd.tgt = Some(Self::range_token(&mut tokens, line)?);
                cmd.patch_offset = Some(Self::int_token(&mut tokens, line)?);
                cmd.patch_len = Some(Self::int_token(&mut tokens, line)?);
            }
            CommandKind::Stash => {
                cmd.src = Some(Self::range_token(&mut tokens, line)?);
            }
            CommandKind::Free | CommandKind::Last => {}
        }

        if tokens.next().is_some() {
            return Err(Error::Command {
                message: format!("trailing operands in {:?}", line),
            });
        }
        Ok(cmd)
    }

    fn next_token<'a>(tokens: &mut impl Iterator<Item = &'a str>, line: &str) -> Result<&'a str> {
        tokens.next().ok_or_else(|| Error::Command {
            message: format!("missing operand in {:?}", line),
        })
    }

    fn hash_token<'a>(tokens: &mut impl Iterator<Item = &'a str>, line: &str) -> Result<String> {
        let token = Self::next_token(tokens, line)?;
        if token.len() != SHA256_HEX_LEN || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::Command {
                message: format!("bad digest operand in {:?}", line),
            });
        }
        Ok(token.to_lowercase())
    }

    fn range_token<'a>(tokens: &mut impl Iterator<Item = &'a str>, line: &str) -> Result<BlockSet> {
        BlockSet::parse(Self::next_token(tokens, line)?)
    }

    fn int_token<'a>(tokens: &mut impl Iterator<Item = &'a str>, line: &str) -> Result<u64> {
        Self::next_token(tokens, line)?
            .parse()
            .map_err(|_| Error::Command {
                message: format!("bad integer operand in {:?}", line),
            })
    }

    /// The command's verb.
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// The raw line, retained for retry-marker matching.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Expected SHA-256 hex digest for this command's content.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Source block set, for verbs that read existing content.
    pub fn source(&self) -> Option<&BlockSet> {
        self.src.as_ref()
    }

    /// Target block set, for verbs that write.
    pub fn target(&self) -> Option<&BlockSet> {
        self.tgt.as_ref()
    }

    /// Declared source block count (MOVE sanity field).
    pub fn source_blocks(&self) -> Option<u64> {
        self.src_blocks
    }

    /// Byte window `(offset, len)` into the patch stream, for diff verbs.
    pub fn patch_window(&self) -> Option<(u64, u64)> {
        Some((self.patch_offset?, self.patch_len?))
    }
}
