// vim: cc=81
use std::process::{Command, Stdio};
pub type DimType = u16;

/// Builds any map implementing From<[(K, V); N]>.
#[macro_export]
macro_rules! dict {
    {$($k:expr => $v:expr),+} => {
        [$(($k, $v)),*].into()
    };
}

#[derive(Debug)]
pub struct TermSize {
    pub cols: DimType,
}

/// Returns the size of the terminal, or None if the size cannot be determined.
pub fn get_termsize() -> Option<TermSize> {
    // Call "stty size" to get output in form of "[LINES] [COLUMNS]\n"
    let output = match Command::new("stty")
        .arg("size")
        .stdin(Stdio::inherit())
        .output()
    {
        Ok(out) => String::from_utf8(out.stdout).ok(),
        Err(_) => None,
    }?;
    Some(TermSize {
        cols: stty_cols(&output)?,
    })
}

/// Columns out of "[LINES] [COLUMNS]\n".
fn stty_cols(output: &str) -> Option<DimType> {
    output.split_whitespace().nth(1)?.parse().ok()
}

/// Terminal width in columns, 80 if unknown.
pub fn term_cols() -> usize {
    get_termsize().map_or(80, |size| usize::from(size.cols))
}

/// Pads or truncates text to exactly width characters.
pub fn fit(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len <= width {
        format!("{text}{}", " ".repeat(width - len))
    } else if width > 3 {
        let cut: String = text.chars().take(width - 3).collect();
        format!("{cut}...")
    } else {
        text.chars().take(width).collect()
    }
}

pub mod ansi {
    pub const ANSI_RESET: &str = "\x1b[0m";
    pub const ANSI_BOLD: &str = "\x1b[1m";
    pub const ANSI_DIM: &str = "\x1b[2;37m";
    pub const ANSI_RED: &str = "\x1b[31m";
    pub const ANSI_GREEN: &str = "\x1b[32m";
    pub const ANSI_YELLOW: &str = "\x1b[33m";
    pub const ANSI_BLUE: &str = "\x1b[1;34m";
    pub const ANSI_CYAN: &str = "\x1b[36m";

    /// Wraps text in code and a reset, or returns it untouched.
    pub fn paint(text: &str, code: &str, enabled: bool) -> String {
        if enabled {
            format!("{code}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }
}
