//! User-facing console output.
//!
//! Everything printed here is also mirrored to the application log so the
//! log file tells the whole story of a race.

#[derive(Debug, Clone, Copy, Default)]
pub struct Console {
    quiet: bool,
}

impl Console {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    pub fn println(&self, msg: impl AsRef<str>) {
        if !self.quiet {
            println!("{}", msg.as_ref());
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        tracing::info!("{}", msg.as_ref());
        self.println(format!("[INFO] {}", msg.as_ref()));
    }

    /// Warnings are shown even in quiet mode.
    pub fn warn(&self, msg: impl AsRef<str>) {
        tracing::warn!("{}", msg.as_ref());
        println!("[WARNING] {}", msg.as_ref());
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        tracing::error!("{}", msg.as_ref());
        eprintln!("[ERROR] {}", msg.as_ref());
    }

    /// A bold-ish heading followed by an underline of the same width.
    pub fn heading(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        tracing::info!("{msg}");
        self.println(msg);
        self.println("-".repeat(msg.chars().count()));
    }
}
