//! Record-mode policy
//!
//! | Mode           | match found | no match                          |
//! |----------------|-------------|-----------------------------------|
//! | `none`         | replay      | fail                              |
//! | `once`         | replay      | record if the cassette is new, else fail |
//! | `new_episodes` | replay      | record                            |
//! | `all`          | record      | record                            |

use super::format::RecordMode;

/// Outcome of one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Serve the interaction at this index
    Replay(usize),
    /// Call upstream and append the result
    Record,
    /// Refuse the request
    Fail,
}

/// Decide what to do with a request
///
/// `matched` is the matcher's result and `cassette_is_new` is true when the
/// cassette file did not exist before this transaction.
#[must_use]
pub fn decide(mode: RecordMode, matched: Option<usize>, cassette_is_new: bool) -> Decision {
    match (mode, matched) {
        (RecordMode::All, _) => Decision::Record,
        (_, Some(index)) => Decision::Replay(index),
        (RecordMode::None, None) => Decision::Fail,
        (RecordMode::Once, None) if cassette_is_new => Decision::Record,
        (RecordMode::Once, None) => Decision::Fail,
        (RecordMode::NewEpisodes, None) => Decision::Record,
    }
}
