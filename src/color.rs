//! Node colors used by trial deletion
//!
//! Every graph node starts grey. Scanning turns it either black (provably
//! reachable from outside the graph) or white (only reachable through other
//! graph nodes, i.e. garbage):
//! - Grey: not decided yet
//! - Black: live
//! - White: provisionally garbage

use std::fmt;

/// The color of a graph node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Color {
    /// Not decided yet
    #[default]
    Grey = 0,
    /// Provably live
    Black = 1,
    /// Reachable only through other white nodes
    White = 2,
}

impl Color {
    #[inline]
    pub fn is_black(self) -> bool {
        self == Color::Black
    }

    #[inline]
    pub fn is_white(self) -> bool {
        self == Color::White
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Color::Grey => "grey",
            Color::Black => "black",
            Color::White => "white",
        })
    }
}
