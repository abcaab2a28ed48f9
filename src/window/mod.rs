//! Render windows
//!
//! Every backend implements `RenderWindow`: `generate_frame()` turns the
//! current pixel source snapshot into something the transport can show, and
//! `draw()` shows it. The two backends are:
//!
//! - `SixelWindow`: encodes frames as sixel escape sequences and writes them
//!   to the shared terminal stream from a worker thread
//! - `OverlayWindow`: uploads frames to a GPU texture and presents them in a
//!   native overlay window placed over the terminal's cell grid

pub mod overlay;
mod sixel;
#[cfg(feature = "gui")]
pub mod winit_overlay;

pub use overlay::OverlayWindow;
pub use sixel::{SixelState, SixelWindow};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Pixel rectangle relative to the terminal window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverlayGeometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Terminal cell metrics in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellGeometry {
    /// Width of one cell
    pub width: u32,
    /// Height of one cell
    pub height: u32,
    /// Horizontal offset of the cell grid inside the terminal window
    pub padding_horizontal: u32,
    /// Vertical offset of the cell grid inside the terminal window
    pub padding_vertical: u32,
}

impl Default for CellGeometry {
    fn default() -> Self {
        Self {
            width: 8,
            height: 16,
            padding_horizontal: 0,
            padding_vertical: 0,
        }
    }
}

impl CellGeometry {
    /// Top-left pixel of the cell at `col`/`row`, including grid padding.
    pub fn to_pixels(&self, col: u16, row: u16) -> (i32, i32) {
        (
            (col as u32 * self.width + self.padding_horizontal) as i32,
            (row as u32 * self.height + self.padding_vertical) as i32,
        )
    }

    /// Number of columns and rows an image of this pixel size covers.
    pub fn cells_spanned(&self, width: u32, height: u32) -> (u32, u32) {
        (
            width.div_ceil(self.width.max(1)),
            height.div_ceil(self.height.max(1)),
        )
    }
}

/// Position of a window's top-left corner, in zero-based terminal cells
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Placement {
    pub col: u16,
    pub row: u16,
}

/// Construction parameters shared by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOptions {
    pub placement: Placement,
    pub cell: CellGeometry,
    /// Make the window visible as soon as it is constructed
    pub show_on_create: bool,
}

impl WindowOptions {
    pub fn at(col: u16, row: u16) -> Self {
        Self {
            placement: Placement { col, row },
            cell: CellGeometry::default(),
            show_on_create: true,
        }
    }

    /// Pixel rectangle of an image of `width x height` at this placement.
    pub fn geometry(&self, width: u32, height: u32) -> OverlayGeometry {
        let (x, y) = self.cell.to_pixels(self.placement.col, self.placement.row);
        OverlayGeometry {
            x,
            y,
            width,
            height,
        }
    }
}

/// The native windowing system hosting overlay windows.
pub trait Windowing: Send + Sync {
    type Window: Send + Sync;

    /// Create an unmapped overlay window covering `geometry`.
    fn create_overlay(&self, geometry: OverlayGeometry) -> Result<Self::Window>;

    fn map(&self, window: &Self::Window);
    fn unmap(&self, window: &Self::Window);

    /// Ask for an expose/redraw notification for `window`.
    fn request_redraw(&self, window: &Self::Window);

    fn destroy(&self, window: Self::Window);
}

/// Contract shared by every render backend.
///
/// All methods take `&self`: a window may be driven from a timer thread and
/// from explicit requests at the same time, and serialises itself.
pub trait RenderWindow: Send + Sync {
    /// Prepare the current source snapshot for display.
    fn generate_frame(&self) -> Result<()>;

    /// Display the last generated frame. A no-op while hidden.
    fn draw(&self) -> Result<()>;

    fn show(&self);
    fn hide(&self);
    fn is_visible(&self) -> bool;

    /// Pixel position and size on screen.
    fn geometry(&self) -> OverlayGeometry;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_to_pixels_includes_padding() {
        let cell = CellGeometry {
            width: 10,
            height: 20,
            padding_horizontal: 3,
            padding_vertical: 5,
        };
        assert_eq!(cell.to_pixels(0, 0), (3, 5));
        assert_eq!(cell.to_pixels(4, 2), (43, 45));
    }

    #[test]
    fn test_cells_spanned_rounds_up() {
        let cell = CellGeometry::default();
        assert_eq!(cell.cells_spanned(64, 64), (8, 4));
        assert_eq!(cell.cells_spanned(65, 17), (9, 2));
    }

    #[test]
    fn test_options_geometry() {
        let options = WindowOptions::at(2, 1);
        assert_eq!(
            options.geometry(64, 32),
            OverlayGeometry {
                x: 16,
                y: 16,
                width: 64,
                height: 32
            }
        );
    }
}
