//! The smart-summary strategy replaces a dropped prefix with a note
//! synthesized by a cheaper upstream model, rather than discarding it
//! outright. The gateway supplies the model call; this crate only defines
//! the seam so it stays independent of the upstream client.

use std::future::Future;
use std::pin::Pin;

pub trait Summarizer: Send + Sync {
    fn summarize<'a>(&'a self, dropped_text: &'a str) -> Pin<Box<dyn Future<Output = String> + Send + 'a>>;
}
