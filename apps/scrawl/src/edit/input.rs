//! Global FIFO of edit intents.
//!
//! Intents run one at a time on a single worker even though each one awaits
//! the pipeline, so caret-dependent operations always observe the caret left
//! behind by the previous intent, in the order the user produced them.
//!
//! Cells inside a protected region are never written and the caret is never
//! placed or moved into one. A refused write still advances the caret.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::caret::Caret;
use super::pipeline::EditPipeline;
use crate::cache::{CellColor, CellPos};
use crate::config::CellRegion;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditIntent {
    /// Write at the caret and advance. `'\n'` behaves like [`EditIntent::Newline`].
    Type(char),
    /// Step left and blank that cell.
    Backspace,
    Newline,
    Paste(String),
    /// Write `text` starting at `at` without touching the caret.
    Write { at: CellPos, text: String },
    MoveCaret { dx: i64, dy: i64 },
    PlaceCaret(CellPos),
    SetColor(Option<CellColor>),
}

pub struct InputQueue {
    tx: mpsc::UnboundedSender<EditIntent>,
    submitted: Arc<AtomicU64>,
    completed: watch::Receiver<u64>,
    caret: watch::Receiver<Caret>,
    worker: JoinHandle<()>,
}

impl InputQueue {
    pub fn spawn(pipeline: EditPipeline, protected: Vec<CellRegion>, initial: Caret) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (caret_tx, caret) = watch::channel(initial);
        let (completed_tx, completed) = watch::channel(0);
        let editor = Editor {
            pipeline,
            protected,
        };
        let worker = tokio::spawn(run_intents(editor, rx, caret_tx, completed_tx));
        Self {
            tx,
            submitted: Arc::new(AtomicU64::new(0)),
            completed,
            caret,
            worker,
        }
    }

    /// Append an intent. Returns false once the queue has shut down.
    pub fn submit(&self, intent: EditIntent) -> bool {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(intent).is_err() {
            self.submitted.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Resolves once every intent submitted before this call has run.
    pub async fn drain(&self) {
        let target = self.submitted.load(Ordering::SeqCst);
        let mut completed = self.completed.clone();
        let _ = completed.wait_for(|done| *done >= target).await;
    }

    pub fn caret(&self) -> Caret {
        *self.caret.borrow()
    }

    pub fn watch_caret(&self) -> watch::Receiver<Caret> {
        self.caret.clone()
    }

    pub fn shutdown(&self) {
        self.worker.abort();
    }
}

impl Drop for InputQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

struct Editor {
    pipeline: EditPipeline,
    protected: Vec<CellRegion>,
}

impl Editor {
    fn is_protected(&self, pos: CellPos) -> bool {
        self.protected.iter().any(|region| region.contains(pos))
    }

    async fn execute(&self, caret: &mut Caret, intent: EditIntent) {
        match intent {
            EditIntent::Type(ch) => self.type_char(caret, ch).await,
            EditIntent::Backspace => {
                caret.retreat();
                self.write_cell(caret.pos, ' ', None).await;
            }
            EditIntent::Newline => caret.newline(),
            EditIntent::Paste(text) => {
                for ch in text.chars() {
                    self.type_char(caret, ch).await;
                }
            }
            EditIntent::Write { at, text } => {
                let mut cursor = Caret {
                    color: caret.color,
                    ..Caret::at(at)
                };
                for ch in text.chars() {
                    self.type_char(&mut cursor, ch).await;
                }
            }
            EditIntent::MoveCaret { dx, dy } => self.place(caret, caret.pos.offset_by(dx, dy)),
            EditIntent::PlaceCaret(pos) => self.place(caret, pos),
            EditIntent::SetColor(color) => caret.color = color,
        }
    }

    fn place(&self, caret: &mut Caret, pos: CellPos) {
        if self.is_protected(pos) {
            debug!(target = "scrawl::input", ?pos, "caret not moved into protected region");
            return;
        }
        caret.place(pos);
    }

    async fn type_char(&self, caret: &mut Caret, ch: char) {
        match ch {
            '\n' => caret.newline(),
            ch if ch.is_control() => {
                trace!(target = "scrawl::input", code = ch as u32, "ignoring control character");
            }
            ch => {
                self.write_cell(caret.pos, ch, caret.color).await;
                caret.advance();
            }
        }
    }

    async fn write_cell(&self, pos: CellPos, ch: char, color: Option<CellColor>) {
        if self.is_protected(pos) {
            trace!(target = "scrawl::input", ?pos, "refusing write to protected cell");
            return;
        }
        let addr = pos.to_address();
        self.pipeline.submit_edit(addr.tile, addr.offset, ch, color).await;
    }
}

async fn run_intents(
    editor: Editor,
    mut rx: mpsc::UnboundedReceiver<EditIntent>,
    caret_tx: watch::Sender<Caret>,
    completed: watch::Sender<u64>,
) {
    while let Some(intent) = rx.recv().await {
        let mut caret = *caret_tx.borrow();
        trace!(target = "scrawl::input", ?intent, pos = ?caret.pos, "running intent");
        editor.execute(&mut caret, intent).await;
        caret_tx.send_if_modified(|current| {
            if *current == caret {
                return false;
            }
            *current = caret;
            true
        });
        completed.send_modify(|done| *done += 1);
    }
    debug!(target = "scrawl::input", "input queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{SharedStore, TileKey, shared_store};
    use crate::config::EngineConfig;
    use crate::gateway::TileGateway;
    use crate::gateway::memory::MemoryBackend;

    fn queue() -> (SharedStore, EditPipeline, InputQueue) {
        let store = shared_store();
        let gateway: Arc<dyn TileGateway> = Arc::new(MemoryBackend::default());
        let pipeline = EditPipeline::new(store.clone(), gateway, &EngineConfig::default());
        let protected = vec![CellRegion {
            min_x: 100,
            min_y: 100,
            max_x: 109,
            max_y: 109,
        }];
        let input = InputQueue::spawn(pipeline.clone(), protected, Caret::at(CellPos::new(14, 0)));
        (store, pipeline, input)
    }

    fn char_at(store: &SharedStore, cell: CellPos) -> Option<char> {
        let addr = cell.to_address();
        store.lock().get(addr.tile).and_then(|tile| tile.char_at(addr.offset))
    }

    #[tokio::test]
    async fn typing_crosses_tile_boundaries_in_order() {
        let (store, pipeline, input) = queue();
        for ch in "abcd".chars() {
            input.submit(EditIntent::Type(ch));
        }
        input.drain().await;
        pipeline.idle().await;

        assert_eq!(char_at(&store, CellPos::new(14, 0)), Some('a'));
        assert_eq!(char_at(&store, CellPos::new(15, 0)), Some('b'));
        assert_eq!(char_at(&store, CellPos::new(16, 0)), Some('c'));
        assert_eq!(input.caret().pos, CellPos::new(18, 0));
        assert_eq!(store.lock().version(TileKey::new(1, 0)), Some(2));
    }

    #[tokio::test]
    async fn backspace_sees_caret_of_previous_intent() {
        let (store, _pipeline, input) = queue();
        input.submit(EditIntent::Type('x'));
        input.submit(EditIntent::Type('y'));
        input.submit(EditIntent::Backspace);
        input.drain().await;

        assert_eq!(char_at(&store, CellPos::new(14, 0)), Some('x'));
        assert_eq!(char_at(&store, CellPos::new(15, 0)), Some(' '));
        assert_eq!(input.caret().pos, CellPos::new(15, 0));
    }

    #[tokio::test]
    async fn paste_wraps_to_anchor_column() {
        let (store, _pipeline, input) = queue();
        input.submit(EditIntent::Paste("ab\r\ncd".into()));
        input.drain().await;

        assert_eq!(char_at(&store, CellPos::new(15, 0)), Some('b'));
        assert_eq!(char_at(&store, CellPos::new(14, 1)), Some('c'));
        assert_eq!(input.caret().pos, CellPos::new(16, 1));
    }

    #[tokio::test]
    async fn programmatic_write_leaves_caret_alone() {
        let (store, _pipeline, input) = queue();
        input.submit(EditIntent::Write {
            at: CellPos::new(-2, -2),
            text: "hi".into(),
        });
        input.drain().await;
        assert_eq!(char_at(&store, CellPos::new(-1, -2)), Some('i'));
        assert_eq!(input.caret().pos, CellPos::new(14, 0));
    }

    #[tokio::test]
    async fn protected_cells_refuse_writes_and_caret() {
        let (store, _pipeline, input) = queue();
        input.submit(EditIntent::Write {
            at: CellPos::new(98, 100),
            text: "abcd".into(),
        });
        input.submit(EditIntent::PlaceCaret(CellPos::new(105, 105)));
        input.submit(EditIntent::MoveCaret { dx: 90, dy: 100 });
        input.drain().await;

        assert_eq!(char_at(&store, CellPos::new(98, 100)), Some('a'));
        assert_eq!(char_at(&store, CellPos::new(99, 100)), Some('b'));
        assert_eq!(char_at(&store, CellPos::new(100, 100)), Some(' '));
        assert_eq!(char_at(&store, CellPos::new(101, 100)), Some(' '));
        assert_eq!(input.caret().pos, CellPos::new(14, 0));
    }
}
