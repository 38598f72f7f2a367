//! End-to-end ledger scenarios through the service layer
//!
//! Every test runs against a fresh in-memory database with a notifier that
//! has no registered callbacks.

use std::sync::Arc;

use commonpot::db::communisms::CreateCommunismInput;
use commonpot::db::refunds::CreateRefundInput;
use commonpot::db::users::CreateUserInput;
use commonpot::services::TransactionInput;
use commonpot::{
    Cents, Config, Gate, LedgerDb, LedgerError, Notifier, Precondition, Services, Share,
    Thresholds, VoteChoice,
};
use diesel::RunQueryDsl;

const COMMUNITY: &str = "Community";

fn create_services(thresholds: Thresholds) -> Services {
    let db = Arc::new(LedgerDb::open_in_memory().unwrap());
    let (notifier, _worker) = Notifier::new(Config::default().notifier);
    let services = Services::new(db, Arc::new(Gate::new()), Arc::new(notifier), thresholds);
    services.users.ensure_community(COMMUNITY).unwrap();
    services
}

fn add_user(services: &Services, name: &str) -> i64 {
    services
        .users
        .create(&CreateUserInput {
            name: Some(name.to_string()),
            permission: true,
            ..Default::default()
        })
        .unwrap()
        .value
        .id
}

/// Current tag of a user, as a client would hold it after a GET
fn user_tag(services: &Services, id: i64) -> Precondition {
    let user = services.users.get(&Precondition::None, id).unwrap();
    Precondition::tag(&user.etag)
}

fn balance(services: &Services, id: i64) -> i64 {
    services.users.get(&Precondition::None, id).unwrap().value.balance
}

fn cents(v: i64) -> Cents {
    Cents::new(v).unwrap()
}

#[test]
fn test_simple_transaction_moves_balance() {
    let services = create_services(Thresholds::default());
    let a = add_user(&services, "alice");
    let b = add_user(&services, "bob");

    let tx = services
        .ledger
        .create_transaction(
            &user_tag(&services, a),
            &TransactionInput {
                sender_id: a,
                receiver_id: b,
                amount: cents(500),
                reason: "lunch".to_string(),
            },
        )
        .unwrap();

    assert_eq!(tx.value.amount, 500);
    assert_eq!(tx.value.reason.as_deref(), Some("lunch"));
    assert_eq!(balance(&services, a), -500);
    assert_eq!(balance(&services, b), 500);
    assert_eq!(services.users.total_balance().unwrap(), 0);
}

#[test]
fn test_many_to_one_by_total_rounds_up() {
    let services = create_services(Thresholds::default());
    let creator = add_user(&services, "creator");
    let u1 = add_user(&services, "u1");
    let u2 = add_user(&services, "u2");
    let u3 = add_user(&services, "u3");
    let u4 = add_user(&services, "u4");

    let multi = services
        .ledger
        .create_many_to_one_by_total(
            &user_tag(&services, creator),
            creator,
            vec![
                Share::new(u1, 7),
                Share::new(u2, 0),
                Share::new(u3, 9),
                Share::new(u4, 2),
            ],
            cents(215),
            "foo",
            None,
        )
        .unwrap()
        .into_inner();

    assert_eq!(multi.multi_transaction.base_amount, 12);
    assert_eq!(multi.total_amount, 216);
    // Zero quantity produces no transaction
    assert_eq!(multi.transactions.len(), 3);
    assert!(multi
        .transactions
        .iter()
        .all(|t| t.receiver_id == creator && t.reason.as_deref() == Some("foo")));

    assert_eq!(balance(&services, u1), -84);
    assert_eq!(balance(&services, u2), 0);
    assert_eq!(balance(&services, u3), -108);
    assert_eq!(balance(&services, u4), -24);
    assert_eq!(balance(&services, creator), 216);
    assert_eq!(services.users.total_balance().unwrap(), 0);
}

#[test]
fn test_one_to_many_by_base_with_indicator() {
    let services = create_services(Thresholds::default());
    let one = add_user(&services, "payer");
    let b = add_user(&services, "b");
    let c = add_user(&services, "c");

    let multi = services
        .ledger
        .create_one_to_many_by_base(
            &user_tag(&services, one),
            one,
            vec![Share::new(b, 1), Share::new(c, 3)],
            cents(25),
            "foo",
            Some("{reason}{n}".to_string()),
        )
        .unwrap()
        .into_inner();

    let reasons: Vec<_> = multi
        .transactions
        .iter()
        .map(|t| t.reason.clone().unwrap_or_default())
        .collect();
    assert_eq!(reasons, vec!["foo1", "foo2"]);
    assert_eq!(multi.total_amount, 100);
    assert_eq!(balance(&services, one), -100);
    assert_eq!(balance(&services, c), 75);
}

#[test]
fn test_duplicate_counterparties_merge() {
    let services = create_services(Thresholds::default());
    let one = add_user(&services, "one");
    let other = add_user(&services, "other");

    let multi = services
        .ledger
        .create_one_to_many_by_base(
            &user_tag(&services, one),
            one,
            vec![Share::new(other, 1), Share::new(other, 1), Share::new(other, 1)],
            cents(40),
            "rounds",
            None,
        )
        .unwrap()
        .into_inner();

    assert_eq!(multi.transactions.len(), 1);
    assert_eq!(multi.transactions[0].amount, 120);
    assert_eq!(balance(&services, other), 120);
}

#[test]
fn test_self_settlement_is_dropped() {
    let services = create_services(Thresholds::default());
    let one = add_user(&services, "one");
    let other = add_user(&services, "other");

    let multi = services
        .ledger
        .create_many_to_one_by_base(
            &user_tag(&services, one),
            one,
            vec![Share::new(one, 5), Share::new(other, 2)],
            cents(10),
            "drinks",
            None,
        )
        .unwrap()
        .into_inner();

    assert_eq!(multi.transactions.len(), 1);
    assert_eq!(multi.transactions[0].sender_id, other);
    assert_eq!(balance(&services, one), 20);

    // By base, settling only with oneself is an empty settlement
    let empty = services
        .ledger
        .create_many_to_one_by_base(
            &user_tag(&services, one),
            one,
            vec![Share::new(one, 5)],
            cents(10),
            "drinks",
            None,
        )
        .unwrap()
        .into_inner();
    assert!(empty.transactions.is_empty());
    assert_eq!(empty.total_amount, 0);
    assert_eq!(empty.multi_transaction.base_amount, 10);

    // By total, nobody is left to divide among
    let err = services
        .ledger
        .create_many_to_one_by_total(
            &user_tag(&services, one),
            one,
            vec![Share::new(one, 5)],
            cents(10),
            "drinks",
            None,
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::NoRecipients));
}

#[test]
fn test_failing_member_rolls_back_whole_split() {
    let services = create_services(Thresholds::default());
    let one = add_user(&services, "one");
    let b = add_user(&services, "b");
    let c = add_user(&services, "c");

    // Reject the second member transaction at the storage layer
    {
        let mut conn = services.context.db.conn().unwrap();
        diesel::sql_query(
            "CREATE TRIGGER reject_foo2 BEFORE INSERT ON transactions \
             WHEN NEW.reason = 'foo2' BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(&mut *conn)
        .unwrap();
    }

    let err = services
        .ledger
        .create_one_to_many_by_base(
            &user_tag(&services, one),
            one,
            vec![Share::new(b, 1), Share::new(c, 1)],
            cents(10),
            "foo",
            Some("{reason}{n}".to_string()),
        )
        .unwrap_err();
    assert!(matches!(err, LedgerError::Database(_)));

    assert_eq!(balance(&services, one), 0);
    assert_eq!(balance(&services, b), 0);
    let stats = services.context.db.stats().unwrap();
    assert_eq!(stats.transactions, 0);
    assert!(services.ledger.list_for_user(one, 10).unwrap().is_empty());
}

#[test]
fn test_communism_settles_toward_creator() {
    let services = create_services(Thresholds::default());
    let creator = add_user(&services, "creator");
    let b = add_user(&services, "b");
    let c = add_user(&services, "c");

    let opened = services
        .communisms
        .create(
            &user_tag(&services, creator),
            &CreateCommunismInput {
                amount: cents(100),
                description: "pizza".to_string(),
                creator_id: creator,
                participants: vec![Share::new(b, 1)],
            },
        )
        .unwrap();
    let id = opened.value.communism.id;

    let updated = services
        .communisms
        .set_participant(&Precondition::tag(&opened.etag), id, c, 2)
        .unwrap();
    let closed = services
        .communisms
        .close(&Precondition::tag(&updated.etag), id)
        .unwrap()
        .into_inner();

    assert!(!closed.communism.active);
    let multi_id = closed.communism.multi_transaction_id.unwrap();
    let multi = services
        .ledger
        .get_multi_transaction(&Precondition::None, multi_id)
        .unwrap()
        .into_inner();
    // 100 over creator 1, b 1, c 2
    assert_eq!(multi.multi_transaction.base_amount, 25);
    assert_eq!(balance(&services, creator), 75);
    assert_eq!(balance(&services, b), -25);
    assert_eq!(balance(&services, c), -50);
    assert_eq!(services.users.total_balance().unwrap(), 0);

    // Stale tag and a second close are both refused
    let err = services
        .communisms
        .close(&Precondition::tag(&updated.etag), id)
        .unwrap_err();
    assert!(matches!(err, LedgerError::PreconditionFailed));
    let err = services.communisms.close(&Precondition::Any, id).unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyClosed { .. }));
}

fn open_refund(services: &Services, creator: i64, amount: i64) -> (i64, i64) {
    let refund = services
        .refunds
        .create(
            &user_tag(services, creator),
            &CreateRefundInput {
                amount: cents(amount),
                description: "printer paper".to_string(),
                creator_id: creator,
            },
        )
        .unwrap()
        .into_inner();
    (refund.refund.id, refund.refund.ballot_id)
}

fn vote(services: &Services, ballot_id: i64, user_id: i64, choice: VoteChoice) {
    services
        .refunds
        .cast_vote(&Precondition::Any, ballot_id, user_id, choice)
        .unwrap();
}

#[test]
fn test_approved_refund_pays_from_pool() {
    let services = create_services(Thresholds::new(2, 2).unwrap());
    let community = services
        .users
        .community(&Precondition::None)
        .unwrap()
        .value
        .id;
    let creator = add_user(&services, "creator");
    let v1 = add_user(&services, "v1");
    let v2 = add_user(&services, "v2");

    let (refund_id, ballot_id) = open_refund(&services, creator, 100);
    vote(&services, ballot_id, v1, VoteChoice::Approve);
    vote(&services, ballot_id, v2, VoteChoice::Approve);

    let resolved = services
        .refunds
        .resolve(&Precondition::Any, refund_id)
        .unwrap()
        .into_inner();

    assert!(!resolved.refund.active);
    assert_eq!(resolved.ballot.ballot.result, Some(2));
    assert!(resolved.ballot.ballot.closed.is_some());

    let tx_id = resolved.refund.transaction_id.unwrap();
    let tx = services
        .ledger
        .get_transaction(&Precondition::None, tx_id)
        .unwrap()
        .into_inner();
    assert_eq!(tx.sender_id, community);
    assert_eq!(tx.receiver_id, creator);
    assert_eq!(tx.amount, 100);
    assert_eq!(balance(&services, community), -100);
    assert_eq!(balance(&services, creator), 100);
}

#[test]
fn test_rejected_refund_moves_nothing() {
    let services = create_services(Thresholds::default());
    let creator = add_user(&services, "creator");
    let v1 = add_user(&services, "v1");
    let v2 = add_user(&services, "v2");

    let (refund_id, ballot_id) = open_refund(&services, creator, 100);
    vote(&services, ballot_id, v1, VoteChoice::Disapprove);
    vote(&services, ballot_id, v2, VoteChoice::Disapprove);

    let resolved = services
        .refunds
        .resolve_ballot(&Precondition::Any, ballot_id)
        .unwrap()
        .into_inner();
    assert_eq!(resolved.ballot.result, Some(-2));

    let refund = services
        .refunds
        .get(&Precondition::None, refund_id)
        .unwrap()
        .into_inner();
    assert!(!refund.refund.active);
    assert_eq!(refund.refund.transaction_id, None);
    assert_eq!(balance(&services, creator), 0);
}

#[test]
fn test_undecided_refund_stays_open() {
    let services = create_services(Thresholds::default());
    let creator = add_user(&services, "creator");
    let v1 = add_user(&services, "v1");
    let v2 = add_user(&services, "v2");

    let (refund_id, ballot_id) = open_refund(&services, creator, 100);
    vote(&services, ballot_id, v1, VoteChoice::Approve);
    vote(&services, ballot_id, v2, VoteChoice::Disapprove);

    let err = services
        .refunds
        .resolve(&Precondition::Any, refund_id)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientConsensus { sum: 0, .. }));
    assert!(err.is_retryable());

    let refund = services
        .refunds
        .get(&Precondition::None, refund_id)
        .unwrap()
        .into_inner();
    assert!(refund.refund.active);
    assert_eq!(refund.ballot.ballot.result, None);

    // Changing a vote replaces it, and the ballot can then pass
    vote(&services, ballot_id, v2, VoteChoice::Approve);
    let ballot = services
        .refunds
        .get_ballot(&Precondition::None, ballot_id)
        .unwrap()
        .into_inner();
    assert_eq!(ballot.votes.len(), 2);
    services
        .refunds
        .resolve(&Precondition::Any, refund_id)
        .unwrap();
}

#[test]
fn test_aborted_refund_cannot_be_resolved() {
    let services = create_services(Thresholds::default());
    let creator = add_user(&services, "creator");
    let v1 = add_user(&services, "v1");

    let (refund_id, ballot_id) = open_refund(&services, creator, 100);
    let aborted = services
        .refunds
        .abort(&Precondition::Any, refund_id)
        .unwrap()
        .into_inner();
    assert_eq!(aborted.ballot.ballot.result, Some(0));

    let err = services
        .refunds
        .resolve(&Precondition::Any, refund_id)
        .unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyClosed { .. }));

    let err = services
        .refunds
        .cast_vote(&Precondition::Any, ballot_id, v1, VoteChoice::Approve)
        .unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyClosed { .. }));
}
