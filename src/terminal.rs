use anyhow::Context;
use crossterm::{QueueableCommand, cursor, style::Print, terminal};
use std::io::{BufWriter, Stdout, Write, stdout};

/// Full-screen text surface for the meter view.
///
/// Owns raw mode and the alternate screen; both are restored on drop, also
/// when setup fails halfway.
pub struct MeterScreen {
    out: BufWriter<Stdout>,
}

impl MeterScreen {
    pub fn open() -> anyhow::Result<Self> {
        terminal::enable_raw_mode().context("enable raw mode")?;
        let mut screen = Self {
            out: BufWriter::new(stdout()),
        };
        screen
            .out
            .queue(terminal::EnterAlternateScreen)?
            .queue(terminal::Clear(terminal::ClearType::All))?
            .queue(cursor::Hide)?;
        screen.out.flush().context("prepare meter screen")?;
        Ok(screen)
    }

    /// Replaces the screen contents with `lines`, clipped to the terminal size.
    pub fn draw(&mut self, lines: &[String]) -> anyhow::Result<()> {
        let (cols, rows) = terminal::size().context("query terminal size")?;
        draw_lines(&mut self.out, lines, cols, rows)
    }
}

impl Drop for MeterScreen {
    fn drop(&mut self) {
        let _ = self
            .out
            .queue(cursor::Show)
            .and_then(|o| o.queue(terminal::LeaveAlternateScreen));
        let _ = self.out.flush();
        let _ = terminal::disable_raw_mode();
    }
}

/// Redraws from the top-left with `lines`, clipped to `cols` x `rows`.
pub fn draw_lines<W: Write>(out: &mut W, lines: &[String], cols: u16, rows: u16) -> anyhow::Result<()> {
    let shown = lines.len().min(rows as usize);
    for (row, line) in lines[..shown].iter().enumerate() {
        let clipped = line.chars().take(cols as usize).collect::<String>();
        out.queue(cursor::MoveTo(0, row as u16))?
            .queue(terminal::Clear(terminal::ClearType::UntilNewLine))?
            .queue(Print(clipped))?;
    }
    if shown < rows as usize {
        out.queue(cursor::MoveTo(0, shown as u16))?
            .queue(terminal::Clear(terminal::ClearType::FromCursorDown))?;
    }
    out.flush()?;
    Ok(())
}
