use sftpsync_core::RemoteEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Winner(RemoteEntry),
    Empty,
}

/// Picks the newest entry. Equal modification times are resolved by the
/// greatest name, so the result never depends on listing order.
pub fn select_latest(entries: &[RemoteEntry]) -> Selection {
    entries
        .iter()
        .max_by(|a, b| {
            a.modified_at
                .cmp(&b.modified_at)
                .then_with(|| a.name.cmp(&b.name))
        })
        .cloned()
        .map_or(Selection::Empty, Selection::Winner)
}
