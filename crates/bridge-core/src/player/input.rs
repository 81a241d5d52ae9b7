use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Pixel size of the automated page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

/// A pixel position inside the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Clickable parts of the match screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "control", rename_all = "snake_case")]
pub enum Control {
    /// Position in the sorted concealed hand, drawn tile excluded.
    HandSlot { index: u8 },
    /// The drawn tile, which sits apart to the right of `hand_len` sorted tiles.
    TsumoSlot { hand_len: u8 },
    ActionButton { slot: u8 },
    CallCandidate { slot: u8 },
    KanCandidate { slot: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UiAction {
    PointerDown(Point),
    PointerUp(Point),
    Wait(Duration),
}

/// Synthetic input sink, usually a browser-automation driver.
pub trait InputDispatcher: Send + Sync {
    fn viewport<'a>(&'a self) -> Pin<Box<dyn Future<Output = anyhow::Result<Viewport>> + Send + 'a>>;

    /// Pixel position of `control` when the driver can find it on screen. `None` means "use
    /// the grid layout".
    fn locate<'a>(
        &'a self,
        control: Control,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<Point>>> + Send + 'a>> {
        let _ = control;
        Box::pin(async { Ok(None) })
    }

    fn dispatch<'a>(
        &'a self,
        action: UiAction,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}
