//! Streak policy: consecutive `correct` evaluations since the last miss.
//!
//! A `skipped` item resets the streak, same as `incorrect`: the streak
//! advertises consecutive correct answers, so skipping past a hard item
//! must not preserve it. Both the live counter in the session runner and
//! the aggregate recompute go through [`advance`] so they cannot drift.

use crate::model::UserResponse;

/// Applies one evaluation to a running streak.
#[must_use]
pub fn advance(streak: u32, response: UserResponse) -> u32 {
    match response {
        UserResponse::Correct => streak.saturating_add(1),
        UserResponse::Incorrect | UserResponse::Skipped => 0,
    }
}

/// Largest streak observed over a whole response sequence.
#[must_use]
pub fn max_over(responses: impl IntoIterator<Item = UserResponse>) -> u32 {
    let mut streak = 0_u32;
    let mut max = 0_u32;
    for response in responses {
        streak = advance(streak, response);
        max = max.max(streak);
    }
    max
}
