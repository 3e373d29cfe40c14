//! Engine behaviour against in-memory backends.

mod common;

use common::{backend, message, Behavior, Event, FakeMailbox, Harness, PLATFORM, SUBJECTS, TARGET};
use otp_search::audit::AuditStatus;
use otp_search::config::keys;
use otp_search::{ErrorCategory, SearchRequest, SearchStatus};
use std::time::Duration;

fn request() -> SearchRequest {
    SearchRequest::new("requester-1", TARGET, PLATFORM)
}

fn code_mail(body: &str) -> otp_search::mailbox::CandidateMessage {
    message(TARGET, SUBJECTS[0], body, 2)
}

// ─────────────────────────────────────────────────────────────────────────────
// Request rejection
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_invalid_email_contacts_nothing() {
    let h = Harness::new(vec![(
        backend("b1", 1),
        FakeMailbox::with_messages(vec![code_mail("Your code: 123456")]),
    )])
    .await;

    for email in ["not-an-email", "Evil <victim@example.com>"] {
        let result = h
            .engine
            .search(&SearchRequest::new("r", email, PLATFORM))
            .await;

        assert!(!result.found, "{email}");
        assert_eq!(result.status, SearchStatus::Error);
        assert_eq!(result.error_category, Some(ErrorCategory::Validation));
        assert_eq!(result.backends_checked, 0);
    }
    assert_eq!(h.connector.opens(), 0);
    assert!(h.audit.is_empty().await);
}

#[tokio::test]
async fn test_unknown_platform_is_not_configured() {
    let h = Harness::new(vec![(backend("b1", 1), FakeMailbox::default())]).await;

    let result = h
        .engine
        .search(&SearchRequest::new("r", TARGET, "unknown-platform"))
        .await;

    assert_eq!(result.status, SearchStatus::Error);
    assert_eq!(result.error_category, Some(ErrorCategory::Configuration));
    assert!(result.message.contains("not configured"));
    assert_eq!(h.connector.opens(), 0);
    assert!(h.audit.is_empty().await);
}

#[tokio::test]
async fn test_disabled_platform_is_not_configured() {
    let h = Harness::new(vec![(backend("b1", 1), FakeMailbox::default())]).await;
    h.platforms.set_enabled(PLATFORM, false).await;

    let result = h.engine.search(&request()).await;
    assert_eq!(result.status, SearchStatus::Error);
    assert_eq!(h.connector.opens(), 0);
}

#[tokio::test]
async fn test_no_enabled_backends() {
    let h = Harness::new(vec![(backend("b1", 1), FakeMailbox::default())]).await;
    h.backends.set_enabled("b1", false).await;

    let result = h.engine.search(&request()).await;
    assert_eq!(result.status, SearchStatus::Error);
    assert_eq!(result.message, "no backends configured");
    assert_eq!(h.connector.opens(), 0);
}

#[tokio::test]
async fn test_search_disabled_and_reenabled() {
    let h = Harness::new(vec![(
        backend("b1", 1),
        FakeMailbox::with_messages(vec![code_mail("Your code: 123456")]),
    )])
    .await;

    h.settings.set(keys::SEARCH_ENABLED, "off").await;
    let result = h.engine.search(&request()).await;
    assert_eq!(result.status, SearchStatus::Error);
    assert_eq!(result.message, "search is disabled");
    assert_eq!(h.connector.opens(), 0);

    // Settings are re-read on every search
    h.settings.set(keys::SEARCH_ENABLED, "1").await;
    let result = h.engine.search(&request()).await;
    assert_eq!(result.status, SearchStatus::Found);
}

#[tokio::test]
async fn test_malformed_settings_are_configuration_errors() {
    let h = Harness::new(vec![(backend("b1", 1), FakeMailbox::default())]).await;
    h.settings.set(keys::BACKEND_TIMEOUT, "soon").await;

    let result = h.engine.search(&request()).await;
    assert_eq!(result.status, SearchStatus::Error);
    assert_eq!(result.error_category, Some(ErrorCategory::Configuration));
    assert_eq!(h.connector.opens(), 0);
}

#[tokio::test]
async fn test_out_of_range_window_is_a_configuration_error() {
    let h = Harness::new(vec![(backend("b1", 1), FakeMailbox::default())]).await;
    h.settings
        .set(keys::QUERY_TIME_LIMIT_MINUTES, "150000000000")
        .await;

    let result = h.engine.search(&request()).await;
    assert_eq!(result.status, SearchStatus::Error);
    assert_eq!(result.error_category, Some(ErrorCategory::Configuration));
    assert!(result.message.contains("too large"), "{}", result.message);
    assert_eq!(h.connector.opens(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Ordering and selection
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_priority_order_and_fallthrough() {
    // Registered out of order; priority decides
    let h = Harness::new(vec![
        (
            backend("b2", 2),
            FakeMailbox::with_messages(vec![code_mail("Your code: 654321")]),
        ),
        (backend("b1", 1), FakeMailbox::default()),
    ])
    .await;

    let result = h.engine.search(&request()).await;

    assert!(result.found);
    assert_eq!(result.status, SearchStatus::Found);
    assert_eq!(result.backends_checked, 2);
    let code = result.code.unwrap();
    assert_eq!(code.code, "654321");
    assert_eq!(code.backend_name, "b2");
    assert_eq!(code.platform, PLATFORM);
    assert_eq!(code.source_email, TARGET);

    let events = h.connector.events();
    assert_eq!(events[0], Event::Open("b1".into()));
    assert_eq!(h.connector.searched_subjects("b1"), SUBJECTS);
    let first_b2 = events
        .iter()
        .position(|e| *e == Event::Open("b2".into()))
        .unwrap();
    let last_b1 = events
        .iter()
        .rposition(|e| matches!(e, Event::Search(b, _) if b == "b1"))
        .unwrap();
    assert!(last_b1 < first_b2);
}

#[tokio::test]
async fn test_first_backend_with_code_wins() {
    let h = Harness::new(vec![
        (
            backend("b1", 1),
            FakeMailbox::with_messages(vec![code_mail("Your code: 111111")]),
        ),
        (
            backend("b2", 2),
            FakeMailbox::with_messages(vec![code_mail("Your code: 222222")]),
        ),
    ])
    .await;

    let result = h.engine.search(&request()).await;
    assert_eq!(result.code.unwrap().code, "111111");
    assert_eq!(result.backends_checked, 1);
    assert!(!h
        .connector
        .events()
        .contains(&Event::Open("b2".into())));
}

#[tokio::test]
async fn test_newest_candidate_first() {
    let h = Harness::new(vec![(
        backend("b1", 1),
        FakeMailbox::with_messages(vec![
            message(TARGET, SUBJECTS[0], "Your code: 111111", 10),
            message(TARGET, SUBJECTS[0], "Your code: 222222", 1),
        ]),
    )])
    .await;

    let result = h.engine.search(&request()).await;
    assert_eq!(result.code.unwrap().code, "222222");
    assert_eq!(result.candidates_seen, 2);
    assert_eq!(h.connector.fetches(), 1);
}

#[tokio::test]
async fn test_fetch_cap_per_subject() {
    let h = Harness::new(vec![(
        backend("b1", 1),
        FakeMailbox::with_messages(vec![
            message(TARGET, SUBJECTS[0], "Your code: 111111", 10),
            message(TARGET, SUBJECTS[0], "no digits here", 1),
        ]),
    )])
    .await;
    h.settings.set(keys::MAX_CANDIDATES_PER_SUBJECT, "1").await;

    let result = h.engine.search(&request()).await;
    assert!(!result.found);
    assert_eq!(result.candidates_seen, 2);
    assert_eq!(h.connector.fetches(), 1);
}

#[tokio::test]
async fn test_code_in_subject_line_is_used() {
    let h = Harness::new(vec![(
        backend("b1", 1),
        FakeMailbox::with_messages(vec![message(
            TARGET,
            "Your sign-in code is 448812",
            "See subject.",
            1,
        )]),
    )])
    .await;

    let result = h.engine.search(&request()).await;
    assert_eq!(result.code.unwrap().code, "448812");
}

#[tokio::test]
async fn test_labeled_code_beats_other_numbers() {
    let h = Harness::new(vec![(
        backend("b1", 1),
        FakeMailbox::with_messages(vec![code_mail("Your code: 004912, ref 2023")]),
    )])
    .await;

    let result = h.engine.search(&request()).await;
    assert_eq!(result.code.unwrap().code, "004912");
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation of candidates
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_spoofed_sender_never_a_candidate() {
    let h = Harness::new(vec![(
        backend("b1", 1),
        FakeMailbox::with_messages(vec![message(
            "attacker@example.com",
            SUBJECTS[0],
            "Your code: 123456",
            1,
        )]),
    )])
    .await;

    let result = h.engine.search(&request()).await;

    assert!(!result.found);
    assert_eq!(result.status, SearchStatus::NotFound);
    assert!(result.candidates.is_empty());
    assert_eq!(result.candidates_seen, 1);
    assert_eq!(result.message, "no matching message found");
}

#[tokio::test]
async fn test_stale_message_ignored() {
    let h = Harness::new(vec![(
        backend("b1", 1),
        FakeMailbox::with_messages(vec![message(TARGET, SUBJECTS[0], "Your code: 123456", 31)]),
    )])
    .await;

    let result = h.engine.search(&request()).await;
    assert!(!result.found);
    assert!(result.candidates.is_empty());

    // A wider window admits it
    h.settings.set(keys::QUERY_TIME_LIMIT_MINUTES, "60").await;
    let result = h.engine.search(&request()).await;
    assert!(result.found);
}

#[tokio::test]
async fn test_candidates_are_summarized() {
    let h = Harness::new(vec![(
        backend("b1", 1),
        FakeMailbox::with_messages(vec![
            message(TARGET, SUBJECTS[0], "Your code: 987654", 3),
            message(TARGET, SUBJECTS[0], "Welcome   aboard", 1),
        ]),
    )])
    .await;

    let result = h.engine.search(&request()).await;

    assert_eq!(result.candidates.len(), 2);
    let newest = result.candidate(0).unwrap();
    assert!(newest.code.is_none());
    assert_eq!(newest.preview, "Welcome aboard");
    assert_eq!(newest.sender, TARGET);

    let with_code = result.candidate(1).unwrap();
    assert_eq!(with_code.code, result.code);
    assert_eq!(with_code.backend_name, "b1");
}

// ─────────────────────────────────────────────────────────────────────────────
// Soft failures and outcome messages
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unreachable_backend_is_skipped() {
    let h = Harness::new(vec![
        (backend("b1", 1), FakeMailbox::behaving(Behavior::Unreachable)),
        (
            backend("b2", 2),
            FakeMailbox::with_messages(vec![code_mail("Your code: 123456")]),
        ),
    ])
    .await;

    let result = h.engine.search(&request()).await;

    assert!(result.found);
    assert_eq!(result.backends_checked, 2);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].backend, "b1");
    assert_eq!(result.failures[0].category, ErrorCategory::Network);
}

#[tokio::test]
async fn test_nothing_reachable_message() {
    let h = Harness::new(vec![
        (backend("b1", 1), FakeMailbox::behaving(Behavior::Unreachable)),
        (backend("b2", 2), FakeMailbox::behaving(Behavior::Unreachable)),
    ])
    .await;

    let result = h.engine.search(&request()).await;

    assert_eq!(result.status, SearchStatus::NotFound);
    assert_eq!(result.backends_checked, 2);
    assert_eq!(result.failures.len(), 2);
    assert_eq!(result.message, "no backend could be reached");
}

#[tokio::test]
async fn test_no_matching_message() {
    let h = Harness::new(vec![
        (backend("b1", 1), FakeMailbox::default()),
        (backend("b2", 2), FakeMailbox::default()),
    ])
    .await;

    let result = h.engine.search(&request()).await;
    assert_eq!(result.status, SearchStatus::NotFound);
    assert_eq!(result.backends_checked, 2);
    assert!(result.failures.is_empty());
    assert_eq!(result.message, "no matching message found");
}

#[tokio::test]
async fn test_fetch_error_is_soft() {
    let h = Harness::new(vec![
        (
            backend("b1", 1),
            FakeMailbox {
                behavior: Behavior::FailFetch,
                ..FakeMailbox::with_messages(vec![code_mail("Your code: 111111")])
            },
        ),
        (
            backend("b2", 2),
            FakeMailbox::with_messages(vec![code_mail("Your code: 222222")]),
        ),
    ])
    .await;

    let result = h.engine.search(&request()).await;
    assert_eq!(result.code.unwrap().code, "222222");
    assert_eq!(result.failures[0].category, ErrorCategory::Timeout);
    assert_eq!(h.connector.opens(), 2);
    assert_eq!(h.connector.closes(), 2);
}

#[tokio::test]
async fn test_rejected_subject_search_moves_to_next_subject() {
    let h = Harness::new(vec![(
        backend("b1", 1),
        FakeMailbox {
            behavior: Behavior::RejectSearchFor(SUBJECTS[0]),
            ..FakeMailbox::with_messages(vec![message(
                TARGET,
                SUBJECTS[1],
                "Your code: 424242",
                1,
            )])
        },
    )])
    .await;

    let result = h.engine.search(&request()).await;

    assert_eq!(result.status, SearchStatus::Found);
    assert_eq!(result.code.unwrap().code, "424242");
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].backend, "b1");
    assert_eq!(result.failures[0].category, ErrorCategory::Protocol);
    assert_eq!(h.connector.searched_subjects("b1"), SUBJECTS);
}

#[tokio::test]
async fn test_rejected_searches_are_reported_distinctly() {
    let h = Harness::new(vec![
        (backend("b1", 1), FakeMailbox::behaving(Behavior::RejectEverySearch)),
        (backend("b2", 2), FakeMailbox::behaving(Behavior::RejectEverySearch)),
    ])
    .await;

    let result = h.engine.search(&request()).await;

    assert_eq!(result.status, SearchStatus::NotFound);
    assert_eq!(result.backends_checked, 2);
    assert_eq!(result.failures.len(), 4);
    assert_eq!(
        result.message,
        "mailbox search failed on every reachable backend"
    );
    assert_eq!(h.connector.closes(), 2);
}

#[tokio::test]
async fn test_partial_failure_is_not_a_plain_miss() {
    let h = Harness::new(vec![
        (backend("b1", 1), FakeMailbox::behaving(Behavior::RejectEverySearch)),
        (backend("b2", 2), FakeMailbox::default()),
    ])
    .await;

    let result = h.engine.search(&request()).await;

    assert_eq!(result.status, SearchStatus::NotFound);
    assert_eq!(result.failures.len(), 2);
    assert_eq!(
        result.message,
        "no matching message found, 2 backend error(s) occurred"
    );
}

#[tokio::test]
async fn test_search_timeout_ends_backend_attempt() {
    let h = Harness::new(vec![
        (
            backend("b1", 1),
            FakeMailbox {
                behavior: Behavior::SearchTimesOut,
                ..FakeMailbox::with_messages(vec![message(
                    TARGET,
                    SUBJECTS[1],
                    "Your code: 111111",
                    1,
                )])
            },
        ),
        (
            backend("b2", 2),
            FakeMailbox::with_messages(vec![code_mail("Your code: 222222")]),
        ),
    ])
    .await;

    let result = h.engine.search(&request()).await;

    assert_eq!(result.code.unwrap().code, "222222");
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].category, ErrorCategory::Timeout);
    assert_eq!(h.connector.searched_subjects("b1").len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Early-stop policy
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stop_on_first_code_skips_remaining_subjects() {
    let h = Harness::new(vec![(
        backend("b1", 1),
        FakeMailbox::with_messages(vec![code_mail("Your code: 123456")]),
    )])
    .await;

    let result = h.engine.search(&request()).await;
    assert!(result.found);
    assert_eq!(h.connector.searched_subjects("b1"), [SUBJECTS[0]]);
}

#[tokio::test]
async fn test_without_early_stop_remaining_subjects_are_counted() {
    let h = Harness::new(vec![
        (
            backend("b1", 1),
            FakeMailbox::with_messages(vec![
                code_mail("Your code: 123456"),
                message(TARGET, SUBJECTS[1], "Your code: 999999", 1),
            ]),
        ),
        (
            backend("b2", 2),
            FakeMailbox::with_messages(vec![code_mail("Your code: 222222")]),
        ),
    ])
    .await;
    h.settings.set(keys::EARLY_SEARCH_STOP, "0").await;

    let result = h.engine.search(&request()).await;

    assert_eq!(result.code.unwrap().code, "123456");
    assert_eq!(h.connector.searched_subjects("b1"), SUBJECTS);
    assert_eq!(result.candidates_seen, 2);
    // Searches only: the second subject's message is never fetched
    assert_eq!(h.connector.fetches(), 1);
    assert_eq!(result.backends_checked, 1);
    assert!(h.connector.searched_subjects("b2").is_empty());
}

#[tokio::test]
async fn test_extraction_miss_moves_on_by_default() {
    let h = Harness::new(vec![
        (
            backend("b1", 1),
            FakeMailbox::with_messages(vec![code_mail("Click the link to sign in")]),
        ),
        (
            backend("b2", 2),
            FakeMailbox::with_messages(vec![code_mail("Your code: 222222")]),
        ),
    ])
    .await;

    let result = h.engine.search(&request()).await;
    assert_eq!(result.code.unwrap().code, "222222");
    assert_eq!(result.backends_checked, 2);
}

#[tokio::test]
async fn test_extraction_miss_ends_search_when_configured() {
    let h = Harness::new(vec![
        (
            backend("b1", 1),
            FakeMailbox::with_messages(vec![code_mail("Click the link to sign in")]),
        ),
        (
            backend("b2", 2),
            FakeMailbox::with_messages(vec![code_mail("Your code: 222222")]),
        ),
    ])
    .await;
    h.settings
        .set(keys::CONTINUE_ON_EXTRACTION_MISS, "false")
        .await;

    let result = h.engine.search(&request()).await;
    assert_eq!(result.status, SearchStatus::NotFound);
    assert_eq!(result.backends_checked, 1);
    assert_eq!(
        result.message,
        "matching messages found but no code could be extracted"
    );
    assert_eq!(result.candidates.len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Budgets and session cleanup
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_stalled_backend_times_out_and_is_closed() {
    let h = Harness::new(vec![
        (backend("b1", 1), FakeMailbox::behaving(Behavior::HangOnSearch)),
        (
            backend("b2", 2),
            FakeMailbox::with_messages(vec![code_mail("Your code: 222222")]),
        ),
    ])
    .await;
    h.settings.set(keys::BACKEND_TIMEOUT, "5").await;

    let result = h.engine.search(&request()).await;

    assert_eq!(result.code.unwrap().code, "222222");
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].backend, "b1");
    assert_eq!(result.failures[0].category, ErrorCategory::Timeout);

    // The abandoned session is closed in the background
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.connector.opens(), 2);
    assert_eq!(h.connector.closes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_overall_budget_abandons_remaining_backends() {
    let h = Harness::new(vec![
        (backend("b1", 1), FakeMailbox::behaving(Behavior::HangOnOpen)),
        (backend("b2", 2), FakeMailbox::behaving(Behavior::HangOnOpen)),
        (
            backend("b3", 3),
            FakeMailbox::with_messages(vec![code_mail("Your code: 333333")]),
        ),
    ])
    .await;
    h.settings.set(keys::BACKEND_TIMEOUT, "20").await;
    h.settings.set(keys::SEARCH_BUDGET, "30").await;

    let result = h.engine.search(&request()).await;

    assert_eq!(result.status, SearchStatus::NotFound);
    assert_eq!(result.backends_checked, 2);
    assert_eq!(result.failures.len(), 2);
    assert_eq!(
        result.message,
        "search budget exhausted after 2 of 3 backends"
    );
    assert_eq!(h.connector.opens(), 0);
}

#[tokio::test]
async fn test_sessions_closed_on_success_and_miss() {
    let h = Harness::new(vec![
        (backend("b1", 1), FakeMailbox::default()),
        (
            backend("b2", 2),
            FakeMailbox::with_messages(vec![code_mail("Your code: 222222")]),
        ),
    ])
    .await;

    h.engine.search(&request()).await;
    assert_eq!(h.connector.opens(), 2);
    assert_eq!(h.connector.closes(), 2);
    assert_eq!(
        h.connector.events().last(),
        Some(&Event::Close("b2".into()))
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_found_search_is_audited_once() {
    let h = Harness::new(vec![(
        backend("b1", 1),
        FakeMailbox::with_messages(vec![code_mail("Your code: 123456")]),
    )])
    .await;

    let result = h.engine.search(&request()).await;
    let record = h.audit.get(result.request_id).await.unwrap();

    assert_eq!(record.status, AuditStatus::Found);
    assert_eq!(record.target_email, TARGET);
    assert_eq!(record.platform, PLATFORM);
    assert!(record.completed_at.is_some());

    let summary = record.result_summary.unwrap();
    assert_eq!(summary["status"], "found");
    assert_eq!(summary["code"], "123456");
    assert_eq!(summary["backend"], "b1");
    assert_eq!(summary["backends_checked"], 1);
    assert_eq!(h.audit.len().await, 1);
}

#[tokio::test]
async fn test_not_found_search_is_audited() {
    let h = Harness::new(vec![(
        backend("b1", 1),
        FakeMailbox::behaving(Behavior::Unreachable),
    )])
    .await;

    let result = h.engine.search(&request()).await;
    let record = h.audit.get(result.request_id).await.unwrap();

    assert_eq!(record.status, AuditStatus::NotFound);
    let summary = record.result_summary.unwrap();
    assert_eq!(summary["failed_backends"][0], "b1");
    assert!(summary["code"].is_null());
}

#[tokio::test]
async fn test_each_search_gets_its_own_record() {
    let h = Harness::new(vec![(backend("b1", 1), FakeMailbox::default())]).await;

    let first = h.engine.search(&request()).await;
    let second = h.engine.search(&request()).await;

    assert_ne!(first.request_id, second.request_id);
    assert_eq!(h.audit.len().await, 2);
    assert_eq!(
        h.audit
            .for_requester(&"requester-1".into())
            .await
            .len(),
        2
    );
}
