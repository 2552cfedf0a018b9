//! Viewer input controller.
//!
//! Turns text commands (one per line, from stdin or a script) into
//! input events. Positions are pixels on the viewer surface and are
//! normalized before they leave the viewer.
//!
//! ```text
//! move X Y                 pointer move
//! down X Y [left|right|middle]
//! up X Y [left|right|middle]
//! tap X Y                  left down + up
//! touch start|move|end FINGER X Y
//! key CODE [CHAR]          key down + up
//! text STRING              key down + up per character
//! quit
//! ```

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use rsession_core::input::{InputAction, InputKind, NormalizedPoint, PointerButton};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("{command}: expected {expected}")]
    Usage {
        command: &'static str,
        expected: &'static str,
    },
    #[error("invalid number: {0}")]
    Number(String),
}

/// One parsed line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Events to send, in order.
    Input(Vec<(InputKind, InputAction)>),
    Quit,
}

/// Parses commands against a fixed surface size.
#[derive(Debug, Clone, Copy)]
pub struct Controller {
    width: u32,
    height: u32,
}

impl Controller {
    pub fn new(surface: (u32, u32)) -> Self {
        Self {
            width: surface.0.max(1),
            height: surface.1.max(1),
        }
    }

    /// `Ok(None)` for blank lines and `#` comments.
    pub fn parse(&self, line: &str) -> Result<Option<Command>, CommandError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let args: Vec<&str> = rest.split_whitespace().collect();

        let events = match verb {
            "quit" | "exit" => return Ok(Some(Command::Quit)),
            "move" => {
                let position = self.point("move", &args, 0)?;
                vec![pointer(position, PointerButton::None, InputAction::Move)]
            }
            "down" | "up" => {
                let name = if verb == "down" { "down" } else { "up" };
                let position = self.point(name, &args, 0)?;
                let button = button(args.get(2).copied())?;
                let action = if verb == "down" { InputAction::Down } else { InputAction::Up };
                vec![pointer(position, button, action)]
            }
            "tap" => {
                let position = self.point("tap", &args, 0)?;
                vec![
                    pointer(position, PointerButton::Left, InputAction::Down),
                    pointer(position, PointerButton::Left, InputAction::Up),
                ]
            }
            "touch" => {
                const USAGE: &str = "start|move|end FINGER X Y";
                let action = match args.first().copied() {
                    Some("start") => InputAction::Down,
                    Some("move") => InputAction::Move,
                    Some("end") => InputAction::Up,
                    _ => return Err(CommandError::Usage { command: "touch", expected: USAGE }),
                };
                let finger: u8 = number(args.get(1).copied(), "touch", USAGE)?;
                let position = self.point("touch", &args, 2)?;
                vec![(InputKind::Touch { position, finger }, action)]
            }
            "key" => {
                const USAGE: &str = "CODE [CHAR]";
                let code: u32 = number(args.first().copied(), "key", USAGE)?;
                let character = args.get(1).and_then(|s| s.chars().next());
                key_press(code, character)
            }
            "text" => {
                if rest.is_empty() {
                    return Err(CommandError::Usage { command: "text", expected: "STRING" });
                }
                rest.chars().flat_map(|c| key_press(c as u32, Some(c))).collect()
            }
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(Command::Input(events)))
    }

    fn point(
        &self,
        command: &'static str,
        args: &[&str],
        at: usize,
    ) -> Result<NormalizedPoint, CommandError> {
        const USAGE: &str = "X Y in surface pixels";
        let x: f32 = number(args.get(at).copied(), command, USAGE)?;
        let y: f32 = number(args.get(at + 1).copied(), command, USAGE)?;
        Ok(NormalizedPoint::from_pixels(x, y, self.width, self.height))
    }

    /// Read commands from `reader` until EOF, `quit` or cancellation.
    /// Bad lines are logged and skipped. EOF only ends input; the
    /// session keeps running.
    pub async fn run<R>(self, reader: R, commands: mpsc::Sender<Command>, cancel: CancellationToken)
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("controller input closed");
                    break;
                }
                Err(e) => {
                    warn!("controller read error: {e}");
                    break;
                }
            };
            match self.parse(&line) {
                Ok(Some(command)) => {
                    let quit = command == Command::Quit;
                    if commands.send(command).await.is_err() || quit {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("{e}"),
            }
        }
    }
}

fn pointer(
    position: NormalizedPoint,
    button: PointerButton,
    action: InputAction,
) -> (InputKind, InputAction) {
    (InputKind::Pointer { position, button }, action)
}

fn key_press(code: u32, character: Option<char>) -> Vec<(InputKind, InputAction)> {
    let kind = InputKind::Key {
        code,
        character,
        repeat: false,
    };
    vec![(kind, InputAction::Down), (kind, InputAction::Up)]
}

fn button(name: Option<&str>) -> Result<PointerButton, CommandError> {
    match name {
        None | Some("left") => Ok(PointerButton::Left),
        Some("right") => Ok(PointerButton::Right),
        Some("middle") => Ok(PointerButton::Middle),
        Some(_) => Err(CommandError::Usage {
            command: "button",
            expected: "left|right|middle",
        }),
    }
}

fn number<T: std::str::FromStr>(
    arg: Option<&str>,
    command: &'static str,
    expected: &'static str,
) -> Result<T, CommandError> {
    let arg = arg.ok_or(CommandError::Usage { command, expected })?;
    arg.parse().map_err(|_| CommandError::Number(arg.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> Controller {
        Controller::new((200, 100))
    }

    fn events(line: &str) -> Vec<(InputKind, InputAction)> {
        match controller().parse(line).unwrap() {
            Some(Command::Input(events)) => events,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tap_is_down_then_up_at_normalized_point() {
        let evs = events("tap 100 25");
        assert_eq!(evs.len(), 2);
        let (InputKind::Pointer { position, button }, InputAction::Down) = evs[0] else {
            panic!("expected pointer down");
        };
        assert_eq!((position.x, position.y), (0.5, 0.25));
        assert_eq!(button, PointerButton::Left);
        assert_eq!(evs[1].1, InputAction::Up);
    }

    #[test]
    fn text_expands_to_key_pairs() {
        let evs = events("text hi");
        assert_eq!(evs.len(), 4);
        assert!(matches!(
            evs[0],
            (InputKind::Key { character: Some('h'), .. }, InputAction::Down)
        ));
        assert!(matches!(
            evs[3],
            (InputKind::Key { character: Some('i'), .. }, InputAction::Up)
        ));
    }

    #[test]
    fn touch_uses_finger_index() {
        let evs = events("touch move 2 0 100");
        assert!(matches!(
            evs[0],
            (InputKind::Touch { finger: 2, .. }, InputAction::Move)
        ));
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        assert_eq!(controller().parse("   ").unwrap(), None);
        assert_eq!(controller().parse("# setup").unwrap(), None);
        assert_eq!(controller().parse("quit").unwrap(), Some(Command::Quit));
    }

    #[test]
    fn errors_name_the_problem() {
        assert_eq!(
            controller().parse("jump 1 2").unwrap_err(),
            CommandError::Unknown("jump".into())
        );
        assert_eq!(
            controller().parse("move x 2").unwrap_err(),
            CommandError::Number("x".into())
        );
        assert!(matches!(
            controller().parse("down 1 2 sideways").unwrap_err(),
            CommandError::Usage { command: "button", .. }
        ));
    }

    #[tokio::test]
    async fn run_forwards_commands_until_eof() {
        let script: &[u8] = b"move 10 10\nbogus\nkey 13\n";
        let (tx, mut rx) = mpsc::channel(8);
        controller().run(script, tx, CancellationToken::new()).await;

        assert!(matches!(rx.recv().await, Some(Command::Input(e)) if e.len() == 1));
        assert!(matches!(rx.recv().await, Some(Command::Input(e)) if e.len() == 2));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn run_stops_at_quit() {
        let mock = tokio_test::io::Builder::new()
            .read(b"down 0 0 right\n")
            .read(b"quit\n")
            .build();
        let (tx, mut rx) = mpsc::channel(8);
        controller()
            .run(tokio::io::BufReader::new(mock), tx, CancellationToken::new())
            .await;

        let Some(Command::Input(events)) = rx.recv().await else {
            panic!("expected input");
        };
        assert!(matches!(
            events[0].0,
            InputKind::Pointer { button: PointerButton::Right, .. }
        ));
        assert_eq!(rx.recv().await, Some(Command::Quit));
        assert_eq!(rx.recv().await, None);
    }
}
