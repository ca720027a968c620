use image::DynamicImage;
use std::io::{self, Write};
use std::time::Duration;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{self, ClearType},
    cursor,
};

const ASCII_RAMP: &str = " .·:;+=xX#@";
const DEFAULT_WIDTH: usize = 80;
const DEFAULT_HEIGHT: usize = 30;

pub struct AsciiRenderer {
    width: usize,
    height: usize,
}

impl AsciiRenderer {
    pub fn new(width: Option<usize>, height: Option<usize>) -> Self {
        let (term_width, term_height) = terminal::size()
            .map(|(w, h)| (w as usize, h as usize))
            .unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));

        // Half resolution keeps redraws cheap
        Self {
            width: width.unwrap_or((term_width / 2).min(DEFAULT_WIDTH / 2)).max(1),
            height: height.unwrap_or((term_height.saturating_sub(5) / 2).min(DEFAULT_HEIGHT / 2)).max(1),
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Frame with `status` overlaid on the top row.
    pub fn render_frame(&self, image: &DynamicImage, status: Option<&str>) -> String {
        let mut grid = self.image_to_ascii(image);
        if let Some(status) = status {
            self.overlay_text(&mut grid, status, self.width / 2, 0);
        }
        self.grid_to_string(&grid)
    }

    /// Full-frame text for when there is no frame to show (auxiliary sensor active).
    pub fn render_message(&self, message: &str) -> String {
        let mut grid = vec![vec![' '; self.width]; self.height];
        self.overlay_text(&mut grid, message, self.width / 2, self.height / 2);
        self.grid_to_string(&grid)
    }

    fn image_to_ascii(&self, image: &DynamicImage) -> Vec<Vec<char>> {
        let mut grid = vec![vec![' '; self.width]; self.height];
        let ramp: Vec<char> = ASCII_RAMP.chars().collect();

        let gray = image.to_luma8();
        let (img_width, img_height) = gray.dimensions();

        for (term_y, row) in grid.iter_mut().enumerate() {
            for (term_x, cell) in row.iter_mut().enumerate() {
                let img_x = (term_x as f32 / self.width as f32 * img_width as f32) as u32;
                let img_y = (term_y as f32 / self.height as f32 * img_height as f32) as u32;

                if img_x < img_width && img_y < img_height {
                    let brightness = gray.get_pixel(img_x, img_y)[0];
                    *cell = ramp[(brightness as usize * (ramp.len() - 1)) / 255];
                }
            }
        }

        grid
    }

    fn overlay_text(&self, grid: &mut [Vec<char>], text: &str, center_x: usize, y: usize) {
        if y >= self.height {
            return;
        }

        let start_x = center_x.saturating_sub(text.chars().count() / 2);
        for (i, ch) in text.chars().enumerate() {
            let x = start_x + i;
            if x < self.width {
                grid[y][x] = ch;
            }
        }
    }

    fn grid_to_string(&self, grid: &[Vec<char>]) -> String {
        grid.iter()
            .map(|row| row.iter().take(self.width).collect::<String>())
            .collect::<Vec<_>>()
            .join("\r\n") // raw mode needs the explicit carriage return
    }
}

pub fn clear_screen() -> io::Result<()> {
    crossterm::execute!(
        io::stdout(),
        terminal::Clear(ClearType::All),
        cursor::MoveTo(0, 0)
    )?;
    io::stdout().flush()
}

/// Keys understood by the watch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKey {
    Trigger,
    Cancel,
    Quit,
}

impl WatchKey {
    pub fn from_code(code: KeyCode) -> Option<Self> {
        match code {
            KeyCode::Char(' ') | KeyCode::Enter => Some(WatchKey::Trigger),
            KeyCode::Char('c') => Some(WatchKey::Cancel),
            KeyCode::Esc | KeyCode::Char('q') => Some(WatchKey::Quit),
            _ => None,
        }
    }
}

/// Wait up to `timeout` for a watch key. Other keys are swallowed.
pub fn poll_key(timeout: Duration) -> io::Result<Option<WatchKey>> {
    if event::poll(timeout)? {
        if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
            if kind != KeyEventKind::Release {
                return Ok(WatchKey::from_code(code));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn brightness_maps_onto_ramp() {
        let renderer = AsciiRenderer::new(Some(4), Some(2));
        let image = GrayImage::from_fn(8, 4, |x, _| if x < 4 { Luma([0]) } else { Luma([255]) });
        let out = renderer.render_frame(&DynamicImage::ImageLuma8(image), None);
        assert_eq!(out, "  @@\r\n  @@");
    }

    #[test]
    fn status_is_drawn_on_top_row() {
        let renderer = AsciiRenderer::new(Some(10), Some(3));
        let image = DynamicImage::ImageLuma8(GrayImage::new(10, 3));
        let out = renderer.render_frame(&image, Some("idle"));
        let first = out.split("\r\n").next().unwrap();
        assert!(first.contains("idle"));
    }

    #[test]
    fn message_is_clipped_to_width() {
        let renderer = AsciiRenderer::new(Some(6), Some(1));
        assert_eq!(renderer.render_message("switching"), "switch");
    }

    #[test]
    fn watch_keys() {
        assert_eq!(WatchKey::from_code(KeyCode::Char(' ')), Some(WatchKey::Trigger));
        assert_eq!(WatchKey::from_code(KeyCode::Char('c')), Some(WatchKey::Cancel));
        assert_eq!(WatchKey::from_code(KeyCode::Esc), Some(WatchKey::Quit));
        assert_eq!(WatchKey::from_code(KeyCode::Char('x')), None);
    }
}
