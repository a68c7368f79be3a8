use crate::cache::{CellColor, CellPos};

/// Text cursor. `anchor_x` is the column a newline returns to: the column
/// where the current typing run started.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Caret {
    pub pos: CellPos,
    pub anchor_x: i64,
    pub color: Option<CellColor>,
}

impl Caret {
    pub fn at(pos: CellPos) -> Self {
        Self {
            pos,
            anchor_x: pos.x,
            color: None,
        }
    }

    pub fn place(&mut self, pos: CellPos) {
        self.pos = pos;
        self.anchor_x = pos.x;
    }

    pub fn advance(&mut self) {
        self.pos = self.pos.offset_by(1, 0);
    }

    pub fn retreat(&mut self) {
        self.pos = self.pos.offset_by(-1, 0);
    }

    pub fn newline(&mut self) {
        self.pos = CellPos::new(self.anchor_x, self.pos.y.saturating_add(1));
    }
}
