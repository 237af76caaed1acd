use std::collections::HashSet;

/// Warnings about constructs that were replaced by something weaker.
/// Each distinct message is logged once, no matter how many paths hit it.
#[derive(Default)]
pub struct Warnings {
    seen:   HashSet<String>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn_once(&mut self, message: String) {
        if self.seen.contains(&message) {
            return;
        }
        warn!("{}", message);
        self.seen.insert(message);
    }

    pub fn count(&self) -> usize {
        self.seen.len()
    }

    pub fn seen(&self, message: &str) -> bool {
        self.seen.contains(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deduplicates() {
        let mut w = Warnings::new();
        w.warn_once("array access too deep".to_string());
        w.warn_once("array access too deep".to_string());
        w.warn_once("float literal".to_string());
        assert_eq!(w.count(), 2);
        assert!(w.seen("float literal"));
    }
}
