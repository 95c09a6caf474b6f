use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt::{Debug, Formatter};
use std::time::SystemTime;

/// Keeps the `keep_count` most recent artifacts, `0` keeps everything.
#[derive(Clone, Copy, Default, Serialize, Deserialize, Debug, Eq, PartialEq)]
pub struct RetentionPolicy {
    pub keep_count: usize,
}

impl RetentionPolicy {
    pub fn new(keep_count: usize) -> Self {
        Self { keep_count }
    }

    pub fn is_disabled(&self) -> bool {
        self.keep_count == 0
    }

    /// Items falling outside the policy, newest first.
    ///
    /// Recency is the item's timestamp with ties broken by the item itself (greater is
    /// newer). `protected` ranks ahead of everything else so the artifact stored by the
    /// current run survives even if the backend reports an older or equal timestamp.
    pub fn get_delete<R, I>(&self, items: I, protected: Option<&R>) -> Vec<R>
    where
        R: Ord,
        I: IntoIterator<Item = ItemWithDateTime<R>>,
    {
        if self.is_disabled() {
            return Vec::new();
        }

        items
            .into_iter()
            .sorted_unstable_by(|a, b| {
                let is_protected = |i: &ItemWithDateTime<R>| protected == Some(&i.item);
                (Reverse(is_protected(a)), Reverse(&a.date_time), Reverse(&a.item)).cmp(&(
                    Reverse(is_protected(b)),
                    Reverse(&b.date_time),
                    Reverse(&b.item),
                ))
            })
            .skip(self.keep_count)
            .map(|i| i.item)
            .collect()
    }
}

/// Most recent item by the same ordering [`RetentionPolicy::get_delete`] uses.
pub fn latest<R, I>(items: I) -> Option<R>
where
    R: Ord,
    I: IntoIterator<Item = ItemWithDateTime<R>>,
{
    items
        .into_iter()
        .max_by(|a, b| (&a.date_time, &a.item).cmp(&(&b.date_time, &b.item)))
        .map(|i| i.item)
}

#[derive(Clone, Hash, Eq, PartialEq)]
pub struct ItemWithDateTime<R> {
    pub item: R,
    pub date_time: DateTime<Utc>,
}

impl<R> From<(R, DateTime<Utc>)> for ItemWithDateTime<R> {
    fn from(value: (R, DateTime<Utc>)) -> Self {
        Self {
            item: value.0,
            date_time: value.1,
        }
    }
}

impl<R> From<(R, SystemTime)> for ItemWithDateTime<R> {
    fn from(value: (R, SystemTime)) -> Self {
        Self {
            item: value.0,
            date_time: value.1.into(),
        }
    }
}

impl<R: Debug> Debug for ItemWithDateTime<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}@{}", self.item, self.date_time)
    }
}
