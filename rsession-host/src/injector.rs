//! Input injection target for the host.
//!
//! Maps normalized positions onto the target window rectangle and
//! tracks which keys, buttons and touches are held. Platform injection
//! belongs to the embedding application, so applied events are logged
//! and the pointer position is published for cursor feedback.

use std::collections::HashSet;

use tokio::sync::watch;
use tracing::{debug, trace};

use rsession_core::input::{
    InputAction, InputEvent, InputInjector, InputKind, NormalizedPoint, PointerButton,
};
use rsession_core::SessionError;

/// Counters kept by [`WindowInjector`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InjectorStats {
    pub pointer: u64,
    pub keys: u64,
    pub touches: u64,
    pub consumed: u64,
}

pub struct WindowInjector {
    window: (i32, i32, u32, u32),
    consume_input: bool,
    keys_down: HashSet<u32>,
    buttons_down: HashSet<PointerButton>,
    touches_down: HashSet<u8>,
    cursor: watch::Sender<Option<NormalizedPoint>>,
    stats: InjectorStats,
}

impl WindowInjector {
    pub fn new(window: (i32, i32, u32, u32), consume_input: bool) -> Self {
        let (cursor, _) = watch::channel(None);
        Self {
            window,
            consume_input,
            keys_down: HashSet::new(),
            buttons_down: HashSet::new(),
            touches_down: HashSet::new(),
            cursor,
            stats: InjectorStats::default(),
        }
    }

    /// Last pointer position applied.
    pub fn cursor(&self) -> watch::Receiver<Option<NormalizedPoint>> {
        self.cursor.subscribe()
    }

    pub fn stats(&self) -> InjectorStats {
        self.stats
    }

    /// Track a press/release pair. Releasing something not held fails.
    fn track<T: Eq + std::hash::Hash>(
        held: &mut HashSet<T>,
        id: T,
        action: InputAction,
    ) -> Result<(), SessionError> {
        match action {
            InputAction::Down => {
                held.insert(id);
                Ok(())
            }
            InputAction::Up => {
                if held.remove(&id) {
                    Ok(())
                } else {
                    Err(SessionError::Inject("release without press".into()))
                }
            }
            InputAction::Move => Ok(()),
        }
    }
}

impl InputInjector for WindowInjector {
    fn inject(&mut self, event: &InputEvent) -> Result<(), SessionError> {
        match event.kind {
            InputKind::Pointer { button, .. } if button != PointerButton::None => {
                Self::track(&mut self.buttons_down, button, event.action)?;
            }
            InputKind::Pointer { .. } => {}
            InputKind::Touch { finger, .. } => {
                if event.action == InputAction::Move && !self.touches_down.contains(&finger) {
                    return Err(SessionError::Inject(format!("touch {finger} moved before start")));
                }
                Self::track(&mut self.touches_down, finger, event.action)?;
            }
            InputKind::Key { code, repeat, .. } => {
                if !repeat {
                    Self::track(&mut self.keys_down, code, event.action)?;
                }
            }
        }

        if self.consume_input {
            self.stats.consumed += 1;
            debug!(device = ?event.device(), action = ?event.action, "input consumed");
            return Ok(());
        }

        match event.kind {
            InputKind::Pointer { position, button } => {
                let (x, y) = position.to_pixels(self.window);
                self.stats.pointer += 1;
                self.cursor.send_replace(Some(position));
                trace!(x, y, ?button, action = ?event.action, "pointer");
            }
            InputKind::Touch { position, finger } => {
                let (x, y) = position.to_pixels(self.window);
                self.stats.touches += 1;
                trace!(x, y, finger, action = ?event.action, "touch");
            }
            InputKind::Key { code, character, repeat } => {
                self.stats.keys += 1;
                trace!(code, ?character, repeat, action = ?event.action, "key");
            }
        }
        Ok(())
    }
}
