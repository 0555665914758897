//! Reaction synchronization.
//!
//! A tracked message's emoji are never updated incrementally from the event
//! that triggered the sync. Instead the desired set is recomputed from the
//! full [`PullRequestRecord`] and the message is reconciled against it:
//!
//! - Each reviewer contributes the emoji of their latest review (by
//!   `submitted_at`, ties broken by review ID). If that review was
//!   dismissed, the reviewer contributes nothing.
//! - A merged or closed PR adds its terminal emoji, which review events
//!   never remove.
//!
//! Because the record, not delivery order, drives the result, redelivered
//! and reordered events converge to the same reactions.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, error, instrument, warn};

use crate::chat::{ChatApi, ChatError, ChatErrorKind};
use crate::store::DocumentStore;
use crate::types::{
    Closure, PrStatus, PullRequestRecord, ReviewId, ReviewRecord, ReviewState, TrackedMessage,
};

pub const APPROVED_EMOJI: &str = "white_check_mark";
pub const CHANGES_REQUESTED_EMOJI: &str = "arrows_counterclockwise";
pub const COMMENTED_EMOJI: &str = "speech_balloon";
pub const MERGED_EMOJI: &str = "tada";
pub const CLOSED_EMOJI: &str = "x";

/// Every emoji the relay manages. Anything else on a message is left alone.
pub const MANAGED_EMOJI: [&str; 5] = [
    APPROVED_EMOJI,
    CHANGES_REQUESTED_EMOJI,
    COMMENTED_EMOJI,
    MERGED_EMOJI,
    CLOSED_EMOJI,
];

pub fn review_emoji(state: ReviewState) -> &'static str {
    match state {
        ReviewState::Approved => APPROVED_EMOJI,
        ReviewState::ChangesRequested => CHANGES_REQUESTED_EMOJI,
        ReviewState::Commented => COMMENTED_EMOJI,
    }
}

pub fn closure_emoji(closure: Closure) -> &'static str {
    match closure {
        Closure::Merged => MERGED_EMOJI,
        Closure::Closed => CLOSED_EMOJI,
    }
}

pub fn is_managed(emoji: &str) -> bool {
    MANAGED_EMOJI.contains(&emoji)
}

/// The currently valid review of each reviewer, keyed by lowercased login.
pub fn current_reviews(record: &PullRequestRecord) -> BTreeMap<String, &ReviewRecord> {
    let mut latest: BTreeMap<String, (DateTime<Utc>, ReviewId, &ReviewRecord)> = BTreeMap::new();
    for (id, review) in &record.reviews {
        let key = review.reviewer.to_lowercase();
        let newer = latest
            .get(&key)
            .is_none_or(|(at, prev_id, _)| (review.submitted_at, *id) > (*at, *prev_id));
        if newer {
            latest.insert(key, (review.submitted_at, *id, review));
        }
    }

    latest
        .into_iter()
        .filter(|(_, (_, _, review))| !review.dismissed)
        .map(|(reviewer, (_, _, review))| (reviewer, review))
        .collect()
}

/// Emoji that should be on every tracked message for this PR.
pub fn desired_reactions(record: &PullRequestRecord) -> BTreeSet<String> {
    let mut desired: BTreeSet<String> = current_reviews(record)
        .values()
        .map(|r| review_emoji(r.state).to_string())
        .collect();
    if let Some(closure) = record.closure {
        desired.insert(closure_emoji(closure).to_string());
    }
    desired
}

/// Status label for a PR: its closure if closed, otherwise the most
/// blocking current review state.
pub fn status_label(record: &PullRequestRecord) -> PrStatus {
    if let Some(closure) = record.closure {
        return closure.status();
    }
    let states: BTreeSet<ReviewState> = current_reviews(record)
        .values()
        .map(|r| r.state)
        .collect();
    [
        ReviewState::ChangesRequested,
        ReviewState::Approved,
        ReviewState::Commented,
    ]
    .into_iter()
    .find(|s| states.contains(s))
    .map(|s| s.status())
    .unwrap_or(PrStatus::Opened)
}

/// A chat failure on one emoji of one message.
#[derive(Debug, Clone)]
pub struct SyncFailure {
    pub channel: String,
    pub emoji: Option<String>,
    pub error: String,
}

/// Outcome of reconciling every tracked message of a PR.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub messages: usize,
    pub added: usize,
    pub removed: usize,
    pub transient: Vec<SyncFailure>,
    pub permanent: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn has_transient(&self) -> bool {
        !self.transient.is_empty()
    }

    fn record_failure(&mut self, message: &TrackedMessage, emoji: Option<&str>, err: &ChatError) {
        let failure = SyncFailure {
            channel: message.channel.to_string(),
            emoji: emoji.map(str::to_string),
            error: err.to_string(),
        };
        if err.is_retriable() {
            warn!(channel = %message.channel, emoji, error = %err, "Transient reaction failure");
            self.transient.push(failure);
        } else {
            error!(
                repo = %message.repo,
                pr = %message.pr_number,
                channel = %message.channel,
                emoji,
                error = %err,
                "Permanent reaction failure"
            );
            self.permanent.push(failure);
        }
    }
}

/// Treats "already present" / "already absent" as success.
fn settle(result: Result<(), ChatError>) -> Result<(), ChatError> {
    match result {
        Err(e) if e.kind == ChatErrorKind::AlreadySatisfied => Ok(()),
        other => other,
    }
}

/// Reconciles one message against `desired`.
///
/// Each emoji is its own call: one failing doesn't stop the rest.
/// `message.reactions` is updated to what is believed applied afterwards.
pub async fn sync_message(
    chat: &dyn ChatApi,
    message: &mut TrackedMessage,
    desired: &BTreeSet<String>,
    report: &mut SyncReport,
) {
    let applied: BTreeSet<String> = match chat.reactions(&message.channel, &message.message_ts).await {
        Ok(live) => live.into_iter().filter(|e| is_managed(e)).collect(),
        Err(e) => {
            debug!(channel = %message.channel, error = %e, "Falling back to recorded reactions");
            message.reactions.clone()
        }
    };

    let mut now_applied = applied.clone();

    for emoji in applied.difference(desired) {
        match settle(
            chat.remove_reaction(&message.channel, &message.message_ts, emoji)
                .await,
        ) {
            Ok(()) => {
                now_applied.remove(emoji);
                report.removed += 1;
            }
            Err(e) => report.record_failure(message, Some(emoji), &e),
        }
    }

    for emoji in desired.difference(&applied) {
        match settle(
            chat.add_reaction(&message.channel, &message.message_ts, emoji)
                .await,
        ) {
            Ok(()) => {
                now_applied.insert(emoji.clone());
                report.added += 1;
            }
            Err(e) => report.record_failure(message, Some(emoji), &e),
        }
    }

    message.reactions = now_applied;
}

/// Reconciles every tracked message of the record's PR and saves them.
///
/// A store failure while saving one message is reported as transient and
/// does not stop the others.
#[instrument(skip_all, fields(repo = %record.repo, pr = %record.pr_number))]
pub async fn sync_pull_request(
    chat: &dyn ChatApi,
    store: &dyn DocumentStore,
    record: &PullRequestRecord,
    messages: Vec<TrackedMessage>,
    now: DateTime<Utc>,
) -> SyncReport {
    let desired = desired_reactions(record);
    let status = status_label(record);
    let mut report = SyncReport::default();

    for mut message in messages {
        report.messages += 1;
        sync_message(chat, &mut message, &desired, &mut report).await;
        message.status = status;
        message.updated_at = now;

        if let Err(e) = store.put_message(&message).await {
            warn!(channel = %message.channel, error = %e, "Failed to save tracked message");
            report.transient.push(SyncFailure {
                channel: message.channel.to_string(),
                emoji: None,
                error: e.to_string(),
            });
        }
    }

    debug!(
        messages = report.messages,
        added = report.added,
        removed = report.removed,
        desired = ?desired,
        "Reactions reconciled"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_utils::{FakeChat, at, pr_record, tracked_message};
    use crate::types::{ChannelId, MessageTs};
    use proptest::prelude::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    // ─── Desired set ───

    #[test]
    fn empty_record_desires_nothing() {
        let record = pr_record("acme/widgets", 42);
        assert!(desired_reactions(&record).is_empty());
        assert_eq!(status_label(&record), PrStatus::Opened);
    }

    #[test]
    fn latest_review_per_reviewer_wins() {
        let mut record = pr_record("acme/widgets", 42);
        record.record_review(ReviewId(1), "bob", ReviewState::ChangesRequested, at(10));
        record.record_review(ReviewId(2), "bob", ReviewState::Approved, at(20));
        assert_eq!(desired_reactions(&record), set(&[APPROVED_EMOJI]));
        assert_eq!(status_label(&record), PrStatus::Approved);
    }

    #[test]
    fn late_delivery_of_older_review_does_not_win() {
        let mut record = pr_record("acme/widgets", 42);
        record.record_review(ReviewId(2), "bob", ReviewState::Approved, at(20));
        record.record_review(ReviewId(1), "bob", ReviewState::ChangesRequested, at(10));
        assert_eq!(desired_reactions(&record), set(&[APPROVED_EMOJI]));
    }

    #[test]
    fn equal_timestamps_break_ties_by_review_id() {
        let mut record = pr_record("acme/widgets", 42);
        record.record_review(ReviewId(7), "bob", ReviewState::Approved, at(10));
        record.record_review(ReviewId(3), "bob", ReviewState::Commented, at(10));
        assert_eq!(desired_reactions(&record), set(&[APPROVED_EMOJI]));
    }

    #[test]
    fn reviewers_are_independent_and_case_insensitive() {
        let mut record = pr_record("acme/widgets", 42);
        record.record_review(ReviewId(1), "alice", ReviewState::Approved, at(10));
        record.record_review(ReviewId(2), "Bob", ReviewState::ChangesRequested, at(11));
        record.record_review(ReviewId(3), "bob", ReviewState::Commented, at(12));
        assert_eq!(
            desired_reactions(&record),
            set(&[APPROVED_EMOJI, COMMENTED_EMOJI])
        );
    }

    #[test]
    fn dismissing_one_reviewer_leaves_the_other() {
        let mut record = pr_record("acme/widgets", 42);
        record.record_review(ReviewId(1), "alice", ReviewState::Approved, at(10));
        record.record_review(ReviewId(2), "bob", ReviewState::ChangesRequested, at(11));
        record.dismiss_review(ReviewId(1), "alice", None, at(10));
        assert_eq!(desired_reactions(&record), set(&[CHANGES_REQUESTED_EMOJI]));
        assert_eq!(status_label(&record), PrStatus::ChangesRequested);
    }

    #[test]
    fn dismissed_latest_review_removes_reviewer_entirely() {
        let mut record = pr_record("acme/widgets", 42);
        record.record_review(ReviewId(1), "bob", ReviewState::Commented, at(10));
        record.record_review(ReviewId(2), "bob", ReviewState::Approved, at(20));
        record.dismiss_review(ReviewId(2), "bob", None, at(20));
        assert!(desired_reactions(&record).is_empty());
    }

    #[test]
    fn closure_emoji_coexists_with_reviews() {
        let mut record = pr_record("acme/widgets", 42);
        record.record_review(ReviewId(1), "bob", ReviewState::Approved, at(10));
        record.closure = Some(Closure::Merged);
        assert_eq!(
            desired_reactions(&record),
            set(&[APPROVED_EMOJI, MERGED_EMOJI])
        );
        assert_eq!(status_label(&record), PrStatus::Merged);

        // A late review after merge keeps the merge marker.
        record.record_review(ReviewId(2), "carol", ReviewState::Commented, at(30));
        assert!(desired_reactions(&record).contains(MERGED_EMOJI));
    }

    // ─── Reconciliation ───

    #[tokio::test]
    async fn removes_stale_then_adds_missing() {
        let chat = FakeChat::new();
        let mut msg = tracked_message("acme/widgets", 42, "C1", "1.0");
        chat.set_reactions(&msg.channel, &msg.message_ts, &[CHANGES_REQUESTED_EMOJI, "eyes"]);

        let mut report = SyncReport::default();
        sync_message(&chat, &mut msg, &set(&[APPROVED_EMOJI]), &mut report).await;

        assert_eq!(msg.reactions, set(&[APPROVED_EMOJI]));
        assert_eq!(
            chat.reactions_on(&msg.channel, &msg.message_ts),
            set(&[APPROVED_EMOJI, "eyes"])
        );
        assert_eq!((report.added, report.removed), (1, 1));
        let calls = chat.reaction_calls();
        assert_eq!(
            calls,
            vec![
                format!("remove {} C1 1.0", CHANGES_REQUESTED_EMOJI),
                format!("add {} C1 1.0", APPROVED_EMOJI),
            ]
        );
    }

    #[tokio::test]
    async fn already_satisfied_counts_as_success() {
        let chat = FakeChat::new();
        chat.fail_reactions_with(ChatError::already_satisfied("already_reacted"));
        let mut msg = tracked_message("acme/widgets", 42, "C1", "1.0");

        let mut report = SyncReport::default();
        sync_message(&chat, &mut msg, &set(&[APPROVED_EMOJI]), &mut report).await;

        assert!(report.transient.is_empty() && report.permanent.is_empty());
        assert_eq!(msg.reactions, set(&[APPROVED_EMOJI]));
    }

    #[tokio::test]
    async fn one_failing_emoji_does_not_stop_others() {
        let chat = FakeChat::new();
        chat.fail_emoji(APPROVED_EMOJI, ChatError::transient("ratelimited"));
        let mut msg = tracked_message("acme/widgets", 42, "C1", "1.0");

        let mut report = SyncReport::default();
        sync_message(
            &chat,
            &mut msg,
            &set(&[APPROVED_EMOJI, MERGED_EMOJI]),
            &mut report,
        )
        .await;

        assert!(report.has_transient());
        assert_eq!(msg.reactions, set(&[MERGED_EMOJI]));
    }

    #[tokio::test]
    async fn unreadable_reactions_fall_back_to_recorded_set() {
        let chat = FakeChat::new();
        chat.fail_reads_with(ChatError::transient("timeout"));
        let mut msg = tracked_message("acme/widgets", 42, "C1", "1.0");
        msg.reactions = set(&[COMMENTED_EMOJI]);

        let mut report = SyncReport::default();
        sync_message(&chat, &mut msg, &set(&[COMMENTED_EMOJI]), &mut report).await;

        assert!(chat.reaction_calls().is_empty());
        assert_eq!(msg.reactions, set(&[COMMENTED_EMOJI]));
    }

    #[tokio::test]
    async fn fan_out_converges_each_message_independently() {
        let chat = FakeChat::new();
        let store = MemoryStore::new();
        let a = tracked_message("acme/widgets", 42, "C1", "1.0");
        let b = tracked_message("acme/widgets", 42, "C2", "2.0");
        chat.set_reactions(&b.channel, &b.message_ts, &[CHANGES_REQUESTED_EMOJI]);
        // C1 is gone; that must not block C2.
        chat.fail_channel(&a.channel, ChatError::permanent("channel_not_found"));

        let mut record = pr_record("acme/widgets", 42);
        record.record_review(ReviewId(1), "bob", ReviewState::Approved, at(10));

        let report =
            sync_pull_request(&chat, &store, &record, vec![a.clone(), b.clone()], at(11)).await;

        assert_eq!(report.messages, 2);
        assert!(!report.has_transient());
        assert!(!report.permanent.is_empty());
        assert_eq!(
            chat.reactions_on(&b.channel, &b.message_ts),
            set(&[APPROVED_EMOJI])
        );
        let saved = store
            .get_message(&b.repo, b.pr_number, &b.channel)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.status, PrStatus::Approved);
        assert_eq!(saved.reactions, set(&[APPROVED_EMOJI]));
    }

    #[tokio::test]
    async fn two_messages_reach_identical_sets() {
        let chat = FakeChat::new();
        let store = MemoryStore::new();
        let a = tracked_message("acme/widgets", 42, "C1", "1.0");
        let b = tracked_message("acme/widgets", 42, "C2", "2.0");
        chat.set_reactions(&a.channel, &a.message_ts, &[COMMENTED_EMOJI]);

        let mut record = pr_record("acme/widgets", 42);
        record.record_review(ReviewId(1), "alice", ReviewState::Approved, at(10));
        record.record_review(ReviewId(2), "bob", ReviewState::ChangesRequested, at(11));

        sync_pull_request(&chat, &store, &record, vec![a.clone(), b.clone()], at(12)).await;

        let expected = set(&[APPROVED_EMOJI, CHANGES_REQUESTED_EMOJI]);
        assert_eq!(chat.reactions_on(&ChannelId::new("C1"), &MessageTs::new("1.0")), expected);
        assert_eq!(chat.reactions_on(&ChannelId::new("C2"), &MessageTs::new("2.0")), expected);
    }

    // ─── Properties ───

    #[derive(Debug, Clone)]
    enum Event {
        Submit(u64, usize, ReviewState, i64),
        Dismiss(u64, usize, i64),
    }

    const REVIEWERS: [&str; 3] = ["alice", "bob", "carol"];

    fn apply(record: &mut PullRequestRecord, event: &Event) {
        match *event {
            Event::Submit(id, who, state, ts) => {
                record.record_review(ReviewId(id), REVIEWERS[who], state, at(ts))
            }
            Event::Dismiss(id, who, ts) => {
                record.dismiss_review(ReviewId(id), REVIEWERS[who], None, at(ts))
            }
        }
    }

    fn arb_state() -> impl Strategy<Value = ReviewState> {
        prop_oneof![
            Just(ReviewState::Approved),
            Just(ReviewState::ChangesRequested),
            Just(ReviewState::Commented),
        ]
    }

    /// Reviews with unique IDs, some of which are later dismissed.
    fn arb_history() -> impl Strategy<Value = Vec<Event>> {
        prop::collection::vec((0usize..3, arb_state(), 0i64..50, any::<bool>()), 0..8).prop_map(
            |reviews| {
                let mut events = Vec::new();
                for (i, (who, state, ts, dismissed)) in reviews.into_iter().enumerate() {
                    let id = i as u64 + 1;
                    events.push(Event::Submit(id, who, state, ts));
                    if dismissed {
                        events.push(Event::Dismiss(id, who, ts));
                    }
                }
                events
            },
        )
    }

    proptest! {
        #[test]
        fn delivery_order_does_not_change_outcome(
            (events, shuffled) in arb_history().prop_flat_map(|events| {
                let shuffled = Just(events.clone()).prop_shuffle();
                (Just(events), shuffled)
            })
        ) {
            let mut in_order = pr_record("acme/widgets", 42);
            for event in &events {
                apply(&mut in_order, event);
            }

            let mut reordered = pr_record("acme/widgets", 42);
            for event in &shuffled {
                apply(&mut reordered, event);
            }

            prop_assert_eq!(desired_reactions(&in_order), desired_reactions(&reordered));
            prop_assert_eq!(status_label(&in_order), status_label(&reordered));
        }

        #[test]
        fn redelivery_is_idempotent(events in arb_history()) {
            let mut once = pr_record("acme/widgets", 42);
            for event in &events {
                apply(&mut once, event);
            }
            let mut twice = once.clone();
            for event in &events {
                apply(&mut twice, event);
            }
            prop_assert_eq!(desired_reactions(&once), desired_reactions(&twice));
        }

        #[test]
        fn at_most_one_review_emoji_per_reviewer(events in arb_history()) {
            let mut record = pr_record("acme/widgets", 42);
            for event in &events {
                apply(&mut record, event);
            }
            prop_assert!(desired_reactions(&record).len() <= REVIEWERS.len());
        }
    }
}
