use serde::Serialize;

pub const HISTORY_CAPACITY: usize = 5;

/// Tags seen or applied for one image, newest first.
///
/// Never longer than [`HISTORY_CAPACITY`], never holds a duplicate or an
/// empty tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TagHistory(Vec<String>);

impl TagHistory {
    /// History for an image currently running `current`, followed by the tags
    /// recorded for it during the last sync.
    pub fn seeded<'a, I>(current: &'a str, recorded: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self::from_newest_first(std::iter::once(current).chain(recorded))
    }

    /// History after `new_tag` replaced `previous_tag` on the image.
    pub fn after_update(&self, new_tag: &str, previous_tag: &str) -> Self {
        Self::from_newest_first(
            std::iter::once(new_tag)
                .chain(self.iter())
                .chain(std::iter::once(previous_tag)),
        )
    }

    fn from_newest_first<'a, I>(tags: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut history = Self::default();
        for tag in tags {
            if history.0.len() == HISTORY_CAPACITY {
                break;
            }
            history.push_back(tag);
        }
        history
    }

    fn push_back(&mut self, tag: &str) {
        if !tag.is_empty() && !self.contains(tag) {
            self.0.push(tag.to_string());
        }
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.iter().any(|t| t == tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}
