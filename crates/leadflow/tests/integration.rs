use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::net::TcpListener;

use leadflow::app::{build_router, AppState};
use leadflow::config::ServerConfig;
use leadflow::db;
use leadflow::distribution::{self, reclaim::SWEEP_LEASE, DistributionError, SweepScope};
use leadflow::events::EventBus;
use leadflow::storage::sqlite::SqliteBackend;
use leadflow::storage::{StorageBackend, StorageError};
use leadflow_models::*;

// --- Direct engine tests ---

/// Monday 2026-03-02 10:00 UTC.
fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
}

fn minutes(m: i64) -> DateTime<Utc> {
    base() + Duration::minutes(m)
}

/// An organization on a fresh database, driven through the storage traits
/// with explicit clocks.
struct Fixture {
    storage: Arc<dyn StorageBackend>,
    events: EventBus,
    org: Organization,
    _tmp: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let path = tmp.path().join("engine.db");
        let storage = db::init_sqlite_storage(path.to_str().unwrap()).unwrap();
        let org = storage
            .create_organization(&CreateOrganization {
                name: "Acme Realty".to_string(),
                utc_offset_minutes: None,
                notify_webhook_url: None,
            })
            .unwrap();
        Fixture {
            storage,
            events: EventBus::default(),
            org,
            _tmp: tmp,
        }
    }

    fn org(&self) -> &str {
        &self.org.id
    }

    fn user(&self, name: &str) -> String {
        self.storage
            .create_user(
                self.org(),
                &CreateUser {
                    name: name.to_string(),
                    email: None,
                },
            )
            .unwrap()
            .id
    }

    fn pipeline(&self, pool: Option<PoolSettings>) -> Pipeline {
        self.storage
            .create_pipeline(
                self.org(),
                &CreatePipeline {
                    name: "Sales".to_string(),
                    stages: None,
                    pool,
                },
            )
            .unwrap()
    }

    fn queue(&self, strategy: Strategy, members: Vec<(MemberRef, i64)>) -> Queue {
        self.storage
            .create_queue(
                self.org(),
                &CreateQueue {
                    name: "Round robin".to_string(),
                    strategy: Some(strategy),
                    is_active: None,
                    members: Some(
                        members
                            .into_iter()
                            .map(|(member, weight)| AddMember {
                                member,
                                weight: Some(weight),
                            })
                            .collect(),
                    ),
                },
            )
            .unwrap()
    }

    fn users_queue(&self, users: &[&String]) -> Queue {
        self.queue(
            Strategy::Simple,
            users
                .iter()
                .map(|u| (MemberRef::User(u.to_string()), 1))
                .collect(),
        )
    }

    fn rule(&self, queue_id: &str, priority: i64, criteria: RuleMatch) -> Rule {
        self.storage
            .create_rule(
                self.org(),
                &CreateRule {
                    queue_id: queue_id.to_string(),
                    name: format!("rule {priority}"),
                    priority: Some(priority),
                    is_active: None,
                    criteria,
                },
            )
            .unwrap()
    }

    fn lead_at(&self, source: &str, at: DateTime<Utc>) -> Lead {
        self.storage
            .create_lead(
                self.org(),
                &LeadEvent {
                    name: "Prospect".to_string(),
                    source: Some(source.to_string()),
                    ..Default::default()
                },
                at,
            )
            .unwrap()
    }

    fn assign(&self, lead_id: &str, at: DateTime<Utc>) -> AssignmentOutcome {
        distribution::assign_lead(self.storage.as_ref(), &self.events, &self.org, lead_id, at)
            .unwrap()
    }

    fn new_assigned_lead(&self, at: DateTime<Utc>) -> (Lead, AssignmentOutcome) {
        let lead = self.lead_at("manual", at);
        let outcome = self.assign(&lead.id, at);
        (self.get_lead(&lead.id), outcome)
    }

    fn get_lead(&self, id: &str) -> Lead {
        self.storage.get_lead(self.org(), id).unwrap().unwrap()
    }

    fn get_queue(&self, id: &str) -> Queue {
        self.storage.get_queue(self.org(), id).unwrap().unwrap()
    }

    fn sweep(&self, at: DateTime<Utc>) -> SweepReport {
        distribution::run_exclusive_sweep(
            self.storage.as_ref(),
            &self.events,
            SweepScope::All,
            at,
            500,
            300,
        )
        .unwrap()
    }

    fn history(&self) -> HistoryPage {
        self.storage
            .list_pool_history(self.org(), &HistoryQuery::default())
            .unwrap()
    }
}

fn pool(timeout_minutes: i64, max_redistributions: i64) -> Option<PoolSettings> {
    Some(PoolSettings {
        enabled: true,
        timeout_minutes,
        max_redistributions,
    })
}

fn assigned_to(outcome: &AssignmentOutcome) -> String {
    outcome
        .assigned_user()
        .unwrap_or_else(|| panic!("expected an assignment, got {outcome:?}"))
        .to_string()
}

#[test]
fn three_leads_rotate_through_three_members() {
    let fx = Fixture::new();
    let (a, b, c) = (fx.user("A"), fx.user("B"), fx.user("C"));
    fx.pipeline(None);
    let queue = fx.users_queue(&[&a, &b, &c]);
    fx.rule(&queue.id, 1, RuleMatch::default());

    let picks: Vec<String> = (0..3)
        .map(|i| assigned_to(&fx.new_assigned_lead(minutes(i)).1))
        .collect();
    assert_eq!(picks, vec![a, b, c]);

    let queue = fx.get_queue(&queue.id);
    assert_eq!(queue.cursor, 0);
    assert_eq!(queue.leads_distributed, 3);
}

#[test]
fn first_assignment_sets_stage_and_writes_no_history() {
    let fx = Fixture::new();
    let a = fx.user("A");
    let pipeline = fx.pipeline(None);
    let queue = fx.users_queue(&[&a]);
    fx.rule(&queue.id, 1, RuleMatch::default());

    let (lead, outcome) = fx.new_assigned_lead(base());
    assert_eq!(
        outcome,
        AssignmentOutcome::Assigned {
            user_id: a.clone(),
            queue_id: queue.id.clone(),
            rule_id: lead_rule_id(&fx),
        }
    );
    assert_eq!(lead.pipeline_id.as_deref(), Some(pipeline.id.as_str()));
    assert_eq!(
        lead.stage_id.as_deref(),
        pipeline.first_stage().map(|s| s.id.as_str())
    );
    assert_eq!(lead.assigned_at.as_deref(), Some("2026-03-02T10:00:00.000Z"));
    assert_eq!(lead.queue_id.as_deref(), Some(queue.id.as_str()));
    assert_eq!(fx.history().total, 0);
}

fn lead_rule_id(fx: &Fixture) -> Option<String> {
    fx.storage
        .list_rules(fx.org())
        .unwrap()
        .first()
        .map(|r| r.id.clone())
}

#[test]
fn assigning_twice_changes_nothing() {
    let fx = Fixture::new();
    let (a, b) = (fx.user("A"), fx.user("B"));
    fx.pipeline(pool(10, 2));
    let queue = fx.users_queue(&[&a, &b]);
    fx.rule(&queue.id, 1, RuleMatch::default());

    let (lead, _) = fx.new_assigned_lead(base());
    let before = fx.get_queue(&queue.id);

    let again = fx.assign(&lead.id, minutes(1));
    assert_eq!(again, AssignmentOutcome::AlreadyAssigned { user_id: a });

    let after = fx.get_queue(&queue.id);
    assert_eq!(after.cursor, before.cursor);
    assert_eq!(after.version, before.version);
    assert_eq!(after.leads_distributed, 1);
    assert_eq!(fx.get_lead(&lead.id).assigned_at, lead.assigned_at);
    assert_eq!(fx.history().total, 0);
}

#[test]
fn weighted_queue_distributes_by_weight() {
    let fx = Fixture::new();
    let (a, b, c) = (fx.user("A"), fx.user("B"), fx.user("C"));
    fx.pipeline(None);
    let queue = fx.queue(
        Strategy::Weighted,
        vec![
            (MemberRef::User(a.clone()), 3),
            (MemberRef::User(b.clone()), 1),
            (MemberRef::User(c.clone()), 2),
        ],
    );
    fx.rule(&queue.id, 1, RuleMatch::default());

    let mut tally: HashMap<String, usize> = HashMap::new();
    for i in 0..12 {
        let user = assigned_to(&fx.new_assigned_lead(minutes(i)).1);
        *tally.entry(user).or_default() += 1;
    }
    assert_eq!(tally[&a], 6);
    assert_eq!(tally[&b], 2);
    assert_eq!(tally[&c], 4);
}

#[test]
fn higher_priority_rule_wins_when_both_match() {
    let fx = Fixture::new();
    let (a, b) = (fx.user("A"), fx.user("B"));
    fx.pipeline(None);
    let first = fx.users_queue(&[&a]);
    let second = fx.users_queue(&[&b]);
    let facebook = RuleMatch {
        source: Some(vec!["facebook".to_string()]),
        ..Default::default()
    };
    fx.rule(&second.id, 2, facebook.clone());
    let winner = fx.rule(&first.id, 1, facebook);

    let lead = fx.lead_at("facebook", base());
    let outcome = fx.assign(&lead.id, base());
    assert_eq!(
        outcome,
        AssignmentOutcome::Assigned {
            user_id: a,
            queue_id: first.id,
            rule_id: Some(winner.id),
        }
    );
}

#[test]
fn saturday_facebook_lead_falls_through_to_fallback() {
    let fx = Fixture::new();
    let (weekday_agent, weekend_agent) = (fx.user("Weekday"), fx.user("Weekend"));
    let pipeline = fx.pipeline(None);
    let weekday = fx.users_queue(&[&weekday_agent]);
    let fallback = fx.users_queue(&[&weekend_agent]);
    fx.storage
        .set_fallback_queue(fx.org(), &pipeline.id, Some(&fallback.id))
        .unwrap();
    fx.rule(
        &weekday.id,
        1,
        RuleMatch {
            source: Some(vec!["facebook".to_string()]),
            schedule: Some(Schedule {
                days: vec![1, 2, 3, 4, 5],
                start: "08:00".to_string(),
                end: "18:00".to_string(),
            }),
            ..Default::default()
        },
    );

    let saturday = Utc.with_ymd_and_hms(2026, 3, 7, 11, 0, 0).unwrap();
    let lead = fx.lead_at("facebook", saturday);
    assert_eq!(
        fx.assign(&lead.id, saturday),
        AssignmentOutcome::Assigned {
            user_id: weekend_agent,
            queue_id: fallback.id,
            rule_id: None,
        }
    );

    let monday = fx.lead_at("facebook", base());
    assert_eq!(assigned_to(&fx.assign(&monday.id, base())), weekday_agent);
}

#[test]
fn schedule_uses_organization_local_time() {
    let fx = Fixture::new();
    let a = fx.user("A");
    fx.storage
        .update_organization(
            fx.org(),
            &UpdateOrganization {
                utc_offset_minutes: Some(-180),
                ..Default::default()
            },
        )
        .unwrap();
    let org = fx.storage.require_organization(fx.org()).unwrap();
    fx.pipeline(None);
    let queue = fx.users_queue(&[&a]);
    fx.rule(
        &queue.id,
        1,
        RuleMatch {
            schedule: Some(Schedule {
                days: vec![1],
                start: "08:00".to_string(),
                end: "18:00".to_string(),
            }),
            ..Default::default()
        },
    );

    // 10:00 UTC Monday is 07:00 local, before the window opens.
    let early = fx.lead_at("manual", base());
    let outcome =
        distribution::assign_lead(fx.storage.as_ref(), &fx.events, &org, &early.id, base())
            .unwrap();
    assert!(matches!(outcome, AssignmentOutcome::Unassigned { .. }));

    let later = fx.lead_at("manual", minutes(90));
    let outcome =
        distribution::assign_lead(fx.storage.as_ref(), &fx.events, &org, &later.id, minutes(90))
            .unwrap();
    assert_eq!(outcome.assigned_user(), Some(a.as_str()));
}

#[test]
fn unroutable_leads_stay_unassigned() {
    let fx = Fixture::new();

    // No pipeline at all.
    let lead = fx.lead_at("manual", base());
    assert!(matches!(
        fx.assign(&lead.id, base()),
        AssignmentOutcome::Unassigned { .. }
    ));

    // A matching rule whose queue has no members.
    fx.pipeline(None);
    let empty = fx.queue(Strategy::Simple, vec![]);
    fx.rule(&empty.id, 1, RuleMatch::default());
    match fx.assign(&lead.id, base()) {
        AssignmentOutcome::Unassigned { reason } => assert!(reason.contains("no members")),
        other => panic!("expected unassigned, got {other:?}"),
    }
    assert_eq!(fx.get_lead(&lead.id).assigned_user_id, None);
}

#[test]
fn inactive_users_and_queues_are_skipped() {
    let fx = Fixture::new();
    let (a, b) = (fx.user("A"), fx.user("B"));
    let pipeline = fx.pipeline(None);
    let queue = fx.users_queue(&[&a, &b]);
    fx.rule(&queue.id, 1, RuleMatch::default());
    fx.storage
        .update_user(
            fx.org(),
            &a,
            &UpdateUser {
                name: None,
                is_active: Some(false),
            },
        )
        .unwrap();

    for i in 0..3 {
        assert_eq!(assigned_to(&fx.new_assigned_lead(minutes(i)).1), b);
    }

    fx.storage
        .update_queue(
            fx.org(),
            &queue.id,
            &UpdateQueue {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
    fx.storage
        .set_fallback_queue(fx.org(), &pipeline.id, Some(&queue.id))
        .unwrap();
    let (_, outcome) = fx.new_assigned_lead(minutes(5));
    assert!(matches!(outcome, AssignmentOutcome::Unassigned { .. }));
}

#[test]
fn team_membership_is_resolved_at_selection_time() {
    let fx = Fixture::new();
    let (a, b) = (fx.user("A"), fx.user("B"));
    fx.pipeline(None);
    let team = fx
        .storage
        .create_team(
            fx.org(),
            &CreateTeam {
                name: "Closers".to_string(),
                user_ids: Some(vec![a.clone()]),
            },
        )
        .unwrap();
    let queue = fx.queue(Strategy::Simple, vec![(MemberRef::Team(team.id.clone()), 1)]);
    fx.rule(&queue.id, 1, RuleMatch::default());

    assert_eq!(assigned_to(&fx.new_assigned_lead(minutes(0)).1), a);

    fx.storage.add_team_member(fx.org(), &team.id, &b).unwrap();
    let picks: Vec<String> = (1..3)
        .map(|i| assigned_to(&fx.new_assigned_lead(minutes(i)).1))
        .collect();
    assert_eq!(picks, vec![a, b]);
}

#[test]
fn timeout_scenario_respects_the_redistribution_cap() {
    let fx = Fixture::new();
    let (a, b, c) = (fx.user("A"), fx.user("B"), fx.user("C"));
    fx.pipeline(pool(10, 2));
    let queue = fx.users_queue(&[&a, &b, &c]);
    fx.rule(&queue.id, 1, RuleMatch::default());

    let (lead, outcome) = fx.new_assigned_lead(minutes(0));
    assert_eq!(assigned_to(&outcome), a);

    let report = fx.sweep(minutes(11));
    assert_eq!(report.redistributed, 1);
    let lead_now = fx.get_lead(&lead.id);
    assert_eq!(lead_now.assigned_user_id.as_deref(), Some(b.as_str()));
    assert_eq!(lead_now.redistribution_count, 1);

    fx.sweep(minutes(22));
    let lead_now = fx.get_lead(&lead.id);
    assert_eq!(lead_now.assigned_user_id.as_deref(), Some(c.as_str()));
    assert_eq!(lead_now.redistribution_count, 2);

    let report = fx.sweep(minutes(33));
    assert_eq!(report, SweepReport::default());
    let lead_now = fx.get_lead(&lead.id);
    assert_eq!(lead_now.assigned_user_id.as_deref(), Some(c.as_str()));
    assert_eq!(lead_now.redistribution_count, 2);

    let history = fx.history();
    assert_eq!(history.total, 2);
    // Newest first.
    assert_eq!(history.entries[0].from_user_id.as_deref(), Some(b.as_str()));
    assert_eq!(history.entries[0].to_user_id, c);
    assert_eq!(history.entries[1].from_user_id.as_deref(), Some(a.as_str()));
    assert_eq!(history.entries[1].to_user_id, b);
    assert!(history
        .entries
        .iter()
        .all(|e| e.reason == RedistributionReason::Timeout));

    // Reclaims do not count as new distributions.
    assert_eq!(fx.get_queue(&queue.id).leads_distributed, 1);
}

#[test]
fn timeout_boundary_is_inclusive() {
    let fx = Fixture::new();
    let (a, b) = (fx.user("A"), fx.user("B"));
    fx.pipeline(pool(10, 3));
    let queue = fx.users_queue(&[&a, &b]);
    fx.rule(&queue.id, 1, RuleMatch::default());
    let (lead, _) = fx.new_assigned_lead(minutes(0));

    let just_before = minutes(10) - Duration::seconds(1);
    assert_eq!(fx.sweep(just_before).redistributed, 0);
    assert_eq!(fx.sweep(minutes(10)).redistributed, 1);
    assert_eq!(
        fx.get_lead(&lead.id).assigned_user_id.as_deref(),
        Some(b.as_str())
    );
}

#[test]
fn reclaim_never_returns_a_lead_to_its_current_owner() {
    let fx = Fixture::new();
    let (a, b) = (fx.user("A"), fx.user("B"));
    fx.pipeline(pool(5, 10));
    let queue = fx.users_queue(&[&a, &b]);
    fx.rule(&queue.id, 1, RuleMatch::default());

    let leads: Vec<Lead> = (0..4).map(|_| fx.new_assigned_lead(minutes(0)).0).collect();
    let mut owners: HashMap<String, String> = leads
        .iter()
        .map(|l| (l.id.clone(), l.assigned_user_id.clone().unwrap()))
        .collect();

    for round in 1..=5 {
        fx.sweep(minutes(round * 6));
        for lead in &leads {
            let now_owner = fx.get_lead(&lead.id).assigned_user_id.unwrap();
            assert_ne!(now_owner, owners[&lead.id], "round {round}");
            owners.insert(lead.id.clone(), now_owner);
        }
    }
}

#[test]
fn single_member_queue_recycles_the_owner_until_the_cap() {
    let fx = Fixture::new();
    let a = fx.user("A");
    fx.pipeline(pool(10, 2));
    let queue = fx.users_queue(&[&a]);
    fx.rule(&queue.id, 1, RuleMatch::default());
    let (lead, _) = fx.new_assigned_lead(minutes(0));

    for (round, at) in [(1, 11), (2, 22)] {
        let report = fx.sweep(minutes(at));
        assert_eq!(report.redistributed, 1, "round {round}");
        let current = fx.get_lead(&lead.id);
        assert_eq!(current.assigned_user_id.as_deref(), Some(a.as_str()));
        assert_eq!(current.redistribution_count, round);
        assert_eq!(
            current.assigned_at,
            Some(leadflow_models::format_timestamp(&minutes(at)))
        );
    }

    // Capped: left with its owner for good.
    assert_eq!(fx.sweep(minutes(33)), SweepReport::default());
    assert_eq!(fx.get_lead(&lead.id).redistribution_count, 2);

    let history = fx.history();
    assert_eq!(history.total, 2);
    assert!(history.entries.iter().all(|e| {
        e.reason == RedistributionReason::Timeout
            && e.from_user_id.as_deref() == Some(a.as_str())
            && e.to_user_id == a
    }));
}

#[test]
fn member_weight_above_the_limit_is_rejected() {
    let fx = Fixture::new();
    let a = fx.user("A");
    let err = fx
        .storage
        .create_queue(
            fx.org(),
            &CreateQueue {
                name: "Heavy".to_string(),
                strategy: Some(Strategy::Weighted),
                is_active: None,
                members: Some(vec![AddMember {
                    member: MemberRef::User(a.clone()),
                    weight: Some(MEMBER_WEIGHT_MAX + 1),
                }]),
            },
        )
        .unwrap_err();
    assert!(matches!(err, StorageError::Invalid(_)));

    let queue = fx.queue(Strategy::Weighted, vec![]);
    let err = fx
        .storage
        .add_queue_member(
            fx.org(),
            &queue.id,
            &AddMember {
                member: MemberRef::User(a),
                weight: Some(i64::MAX),
            },
        )
        .unwrap_err();
    assert!(matches!(err, StorageError::Invalid(_)));
}

#[test]
fn weighted_reclaim_skips_past_a_heavy_owner() {
    let fx = Fixture::new();
    let (a, b) = (fx.user("A"), fx.user("B"));
    fx.pipeline(pool(10, 3));
    let queue = fx.queue(
        Strategy::Weighted,
        vec![
            (MemberRef::User(a.clone()), MEMBER_WEIGHT_MAX),
            (MemberRef::User(b.clone()), 1),
        ],
    );
    fx.rule(&queue.id, 1, RuleMatch::default());
    let (lead, outcome) = fx.new_assigned_lead(minutes(0));
    assert_eq!(assigned_to(&outcome), a);
    assert_eq!(fx.get_queue(&queue.id).cursor, 1);

    let started = std::time::Instant::now();
    assert_eq!(fx.sweep(minutes(11)).redistributed, 1);
    assert!(started.elapsed() < std::time::Duration::from_secs(2));

    assert_eq!(fx.get_lead(&lead.id).assigned_user_id, Some(b));
    // Jumped to B's single position, then wrapped.
    assert_eq!(fx.get_queue(&queue.id).cursor, 0);
}

#[test]
fn reclaim_uses_fallback_when_origin_queue_is_inactive() {
    let fx = Fixture::new();
    let (a, b, c) = (fx.user("A"), fx.user("B"), fx.user("C"));
    let pipeline = fx.pipeline(pool(10, 2));
    let origin = fx.users_queue(&[&a, &b]);
    let fallback = fx.users_queue(&[&c]);
    fx.rule(&origin.id, 1, RuleMatch::default());
    fx.storage
        .set_fallback_queue(fx.org(), &pipeline.id, Some(&fallback.id))
        .unwrap();
    let (lead, _) = fx.new_assigned_lead(minutes(0));

    fx.storage
        .update_queue(
            fx.org(),
            &origin.id,
            &UpdateQueue {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(fx.sweep(minutes(11)).redistributed, 1);
    let lead = fx.get_lead(&lead.id);
    assert_eq!(lead.assigned_user_id, Some(c));
    assert_eq!(lead.queue_id, Some(fallback.id));
}

#[test]
fn pool_disabled_pipelines_are_not_swept() {
    let fx = Fixture::new();
    let (a, b) = (fx.user("A"), fx.user("B"));
    fx.pipeline(None);
    let queue = fx.users_queue(&[&a, &b]);
    fx.rule(&queue.id, 1, RuleMatch::default());
    let (lead, _) = fx.new_assigned_lead(minutes(0));

    assert_eq!(fx.sweep(minutes(500)), SweepReport::default());
    assert_eq!(fx.get_lead(&lead.id).assigned_user_id, Some(a));
}

#[test]
fn first_touch_takes_a_lead_out_of_the_pool() {
    let fx = Fixture::new();
    let (a, b) = (fx.user("A"), fx.user("B"));
    fx.pipeline(pool(10, 2));
    let queue = fx.users_queue(&[&a, &b]);
    fx.rule(&queue.id, 1, RuleMatch::default());
    let (lead, _) = fx.new_assigned_lead(minutes(0));
    assert_eq!(fx.storage.list_pool_leads(fx.org(), None).unwrap().len(), 1);

    let touched =
        distribution::touch_lead(fx.storage.as_ref(), &fx.events, fx.org(), &lead.id, minutes(3))
            .unwrap();
    assert_eq!(
        touched.first_touch_at.as_deref(),
        Some("2026-03-02T10:03:00.000Z")
    );
    let again =
        distribution::touch_lead(fx.storage.as_ref(), &fx.events, fx.org(), &lead.id, minutes(8))
            .unwrap();
    assert_eq!(again.first_touch_at, touched.first_touch_at);

    assert!(fx.storage.list_pool_leads(fx.org(), None).unwrap().is_empty());
    assert_eq!(fx.sweep(minutes(30)).redistributed, 0);
    assert_eq!(fx.get_lead(&lead.id).assigned_user_id, Some(a));
}

#[test]
fn pool_leads_are_listed_oldest_first() {
    let fx = Fixture::new();
    let (a, b) = (fx.user("A"), fx.user("B"));
    let pipeline = fx.pipeline(pool(10, 2));
    let queue = fx.users_queue(&[&a, &b]);
    fx.rule(&queue.id, 1, RuleMatch::default());

    let newer = fx.new_assigned_lead(minutes(5)).0;
    let older = fx.new_assigned_lead(minutes(1)).0;
    let listed: Vec<String> = fx
        .storage
        .list_pool_leads(fx.org(), Some(&pipeline.id))
        .unwrap()
        .into_iter()
        .map(|l| l.id)
        .collect();
    assert_eq!(listed, vec![older.id, newer.id]);
}

#[test]
fn manual_reassignment_is_audited_without_counting() {
    let fx = Fixture::new();
    let (a, b, idle) = (fx.user("A"), fx.user("B"), fx.user("Idle"));
    fx.pipeline(pool(10, 2));
    let queue = fx.users_queue(&[&a]);
    fx.rule(&queue.id, 1, RuleMatch::default());
    let (lead, _) = fx.new_assigned_lead(minutes(0));

    let entry = distribution::reassign_lead(
        fx.storage.as_ref(),
        &fx.events,
        fx.org(),
        &lead.id,
        &b,
        minutes(2),
    )
    .unwrap();
    assert_eq!(entry.reason, RedistributionReason::Manual);
    assert_eq!(entry.from_user_id.as_deref(), Some(a.as_str()));

    let lead_now = fx.get_lead(&lead.id);
    assert_eq!(lead_now.assigned_user_id.as_deref(), Some(b.as_str()));
    assert_eq!(lead_now.redistribution_count, 0);
    assert_eq!(fx.history().total, 1);

    fx.storage
        .update_user(
            fx.org(),
            &idle,
            &UpdateUser {
                name: None,
                is_active: Some(false),
            },
        )
        .unwrap();
    let err = distribution::reassign_lead(
        fx.storage.as_ref(),
        &fx.events,
        fx.org(),
        &lead.id,
        &idle,
        minutes(3),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        DistributionError::Storage(StorageError::Invalid(_))
    ));
}

#[test]
fn a_held_lease_refuses_a_second_sweep() {
    let fx = Fixture::new();
    assert!(fx
        .storage
        .try_acquire_lease(SWEEP_LEASE, "other-node", base(), 300)
        .unwrap());

    let err = distribution::run_exclusive_sweep(
        fx.storage.as_ref(),
        &fx.events,
        SweepScope::All,
        minutes(1),
        500,
        300,
    )
    .unwrap_err();
    assert!(matches!(err, DistributionError::SweepInProgress));

    // Expired leases can be taken over.
    assert!(distribution::run_exclusive_sweep(
        fx.storage.as_ref(),
        &fx.events,
        SweepScope::All,
        minutes(6),
        500,
        300,
    )
    .is_ok());

    // Released after the run.
    assert!(fx
        .storage
        .try_acquire_lease(SWEEP_LEASE, "another", minutes(7), 300)
        .unwrap());
}

#[test]
fn pool_settings_are_clamped_on_write() {
    let fx = Fixture::new();
    let pipeline = fx.pipeline(pool(500, 0));
    assert_eq!(pipeline.pool.timeout_minutes, 120);
    assert_eq!(pipeline.pool.max_redistributions, 1);

    let updated = fx
        .storage
        .update_pool_settings(
            fx.org(),
            &pipeline.id,
            &PoolSettings {
                enabled: true,
                timeout_minutes: 0,
                max_redistributions: 50,
            },
        )
        .unwrap()
        .unwrap();
    assert_eq!(updated.pool.timeout_minutes, 1);
    assert_eq!(updated.pool.max_redistributions, 10);
}

#[test]
fn referenced_queues_cannot_be_deleted() {
    let fx = Fixture::new();
    let a = fx.user("A");
    let pipeline = fx.pipeline(None);
    let queue = fx.users_queue(&[&a]);
    let rule = fx.rule(&queue.id, 1, RuleMatch::default());

    let err = fx.storage.delete_queue(fx.org(), &queue.id).unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));

    fx.storage
        .update_rule(
            fx.org(),
            &rule.id,
            &UpdateRule {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
    fx.storage
        .set_fallback_queue(fx.org(), &pipeline.id, Some(&queue.id))
        .unwrap();
    assert!(matches!(
        fx.storage.delete_queue(fx.org(), &queue.id),
        Err(StorageError::Conflict(_))
    ));

    fx.storage
        .set_fallback_queue(fx.org(), &pipeline.id, None)
        .unwrap();
    assert!(fx.storage.delete_queue(fx.org(), &queue.id).unwrap());
    // The inactive rule went with it.
    assert!(fx.storage.get_rule(fx.org(), &rule.id).unwrap().is_none());
}

#[test]
fn removing_members_resets_an_out_of_range_cursor() {
    let fx = Fixture::new();
    let (a, b, c) = (fx.user("A"), fx.user("B"), fx.user("C"));
    fx.pipeline(None);
    let queue = fx.users_queue(&[&a, &b, &c]);
    fx.rule(&queue.id, 1, RuleMatch::default());
    fx.new_assigned_lead(minutes(0));
    fx.new_assigned_lead(minutes(1));
    assert_eq!(fx.get_queue(&queue.id).cursor, 2);

    let last = queue.members.last().unwrap().id.clone();
    assert!(fx
        .storage
        .remove_queue_member(fx.org(), &queue.id, &last)
        .unwrap());
    let after = fx.get_queue(&queue.id);
    assert_eq!(after.members.len(), 2);
    assert_eq!(after.cursor, 0);
    assert_eq!(assigned_to(&fx.new_assigned_lead(minutes(2)).1), a);
}

#[test]
fn overnight_schedules_are_rejected() {
    let fx = Fixture::new();
    let a = fx.user("A");
    let queue = fx.users_queue(&[&a]);
    let err = fx
        .storage
        .create_rule(
            fx.org(),
            &CreateRule {
                queue_id: queue.id,
                name: "Night shift".to_string(),
                priority: None,
                is_active: None,
                criteria: RuleMatch {
                    schedule: Some(Schedule {
                        days: vec![1],
                        start: "22:00".to_string(),
                        end: "06:00".to_string(),
                    }),
                    ..Default::default()
                },
            },
        )
        .unwrap_err();
    assert!(matches!(err, StorageError::Invalid(_)));
}

#[test]
fn organizations_do_not_see_each_other() {
    let fx = Fixture::new();
    let a = fx.user("A");
    let other = fx
        .storage
        .create_organization(&CreateOrganization {
            name: "Other".to_string(),
            utc_offset_minutes: None,
            notify_webhook_url: None,
        })
        .unwrap();
    assert!(fx.storage.get_user(&other.id, &a).unwrap().is_none());
    assert!(fx.storage.list_users(&other.id).unwrap().is_empty());

    // A queue cannot reference another organization's user.
    let err = fx
        .storage
        .create_queue(
            &other.id,
            &CreateQueue {
                name: "Borrowed".to_string(),
                strategy: None,
                is_active: None,
                members: Some(vec![AddMember {
                    member: MemberRef::User(a),
                    weight: None,
                }]),
            },
        )
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
}

#[test]
fn concurrent_assignments_never_skip_a_slot() {
    let fx = Fixture::new();
    let users: Vec<String> = ["A", "B", "C"].iter().map(|n| fx.user(n)).collect();
    fx.pipeline(None);
    let queue = fx.users_queue(&users.iter().collect::<Vec<_>>());
    fx.rule(&queue.id, 1, RuleMatch::default());

    let lead_ids: Vec<String> = (0..24).map(|i| fx.lead_at("manual", minutes(i)).id).collect();
    let outcomes: Vec<AssignmentOutcome> = std::thread::scope(|s| {
        let handles: Vec<_> = lead_ids
            .chunks(6)
            .map(|chunk| {
                let fx = &fx;
                s.spawn(move || {
                    chunk
                        .iter()
                        .map(|id| fx.assign(id, base()))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let mut tally: HashMap<String, usize> = HashMap::new();
    for outcome in &outcomes {
        if let Some(user) = outcome.assigned_user() {
            *tally.entry(user.to_string()).or_default() += 1;
        }
    }
    let assigned: usize = tally.values().sum();
    // Every successful cursor write takes the next slot, so per-member
    // counts never drift apart by more than one.
    let max = tally.values().copied().max().unwrap_or(0);
    let min = users
        .iter()
        .map(|u| tally.get(u).copied().unwrap_or(0))
        .min()
        .unwrap_or(0);
    assert!(max - min <= 1, "unfair distribution: {tally:?}");
    assert_eq!(
        fx.get_queue(&queue.id).leads_distributed as usize,
        assigned
    );
}

// --- HTTP tests ---

/// A self-contained server with its own temp DB and random port.
struct TestServer {
    base_url: String,
    _tmp: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let db_path = tmp.path().join("test.db");
        let conn = db::init_db(db_path.to_str().unwrap()).unwrap();
        let storage = SqliteBackend::new(Arc::new(Mutex::new(conn)));
        let state = AppState::new(Arc::new(storage), ServerConfig::default());
        let router = build_router(state);

        // Bind to port 0 → OS picks a free port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        TestServer {
            base_url: format!("http://{addr}"),
            _tmp: tmp,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        Client::new()
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        Client::new().get(self.url(path)).send().await.unwrap()
    }

    async fn create(&self, path: &str, body: Value) -> Value {
        let resp = self.post(path, body).await;
        assert_eq!(resp.status(), 201, "POST {path}");
        resp.json().await.unwrap()
    }

    /// Organization with two agents, a default pipeline, a two-member queue
    /// and a catch-all rule. Returns (org_id, [agent ids], queue_id).
    async fn seed(&self) -> (String, Vec<String>, String) {
        let org = self.create("/api/orgs", json!({"name": "Acme"})).await;
        let org_id = org["id"].as_str().unwrap().to_string();
        let prefix = format!("/api/orgs/{org_id}");

        let mut agents = Vec::new();
        for name in ["Ana", "Bruno"] {
            let user = self
                .create(&format!("{prefix}/users"), json!({"name": name}))
                .await;
            agents.push(user["id"].as_str().unwrap().to_string());
        }
        self.create(&format!("{prefix}/pipelines"), json!({"name": "Sales"}))
            .await;
        let queue = self
            .create(
                &format!("{prefix}/queues"),
                json!({
                    "name": "Inbound",
                    "members": [
                        {"member": {"kind": "user", "id": agents[0]}},
                        {"member": {"kind": "user", "id": agents[1]}}
                    ]
                }),
            )
            .await;
        let queue_id = queue["id"].as_str().unwrap().to_string();
        self.create(
            &format!("{prefix}/rules"),
            json!({"queue_id": queue_id, "name": "Everything", "match": {}}),
        )
        .await;
        (org_id, agents, queue_id)
    }
}

#[tokio::test]
async fn health_check() {
    let server = TestServer::start().await;
    let resp = server.get("/health").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn unknown_organization_is_404() {
    let server = TestServer::start().await;
    let resp = server.get("/api/orgs/nope/queues").await;
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("organization"));
}

#[tokio::test]
async fn manual_leads_rotate_between_agents() {
    let server = TestServer::start().await;
    let (org_id, agents, queue_id) = server.seed().await;

    let mut owners = Vec::new();
    for name in ["L1", "L2", "L3"] {
        let body = server
            .create(
                &format!("/api/orgs/{org_id}/leads"),
                json!({"name": name, "phone": "+5511999990000"}),
            )
            .await;
        assert_eq!(body["assignment"]["outcome"], "assigned");
        assert_eq!(body["assignment"]["queue_id"], queue_id.as_str());
        assert_eq!(body["lead"]["source"], "manual");
        owners.push(body["lead"]["assigned_user_id"].as_str().unwrap().to_string());
    }
    assert_eq!(owners, vec![agents[0].clone(), agents[1].clone(), agents[0].clone()]);

    let queue: Value = server
        .get(&format!("/api/orgs/{org_id}/queues/{queue_id}"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(queue["leads_distributed"], 3);
    assert_eq!(queue["cursor"], 1);
}

#[tokio::test]
async fn lead_is_created_even_when_nothing_routes_it() {
    let server = TestServer::start().await;
    let org = server.create("/api/orgs", json!({"name": "Empty"})).await;
    let org_id = org["id"].as_str().unwrap();

    let body = server
        .create(
            &format!("/api/orgs/{org_id}/leads"),
            json!({"name": "Orphan"}),
        )
        .await;
    assert_eq!(body["assignment"]["outcome"], "unassigned");
    assert!(body["lead"]["assigned_user_id"].is_null());

    let lead_id = body["lead"]["id"].as_str().unwrap();
    let resp = server
        .get(&format!("/api/orgs/{org_id}/leads/{lead_id}"))
        .await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn webhook_uses_integration_as_source() {
    let server = TestServer::start().await;
    let (org_id, agents, _) = server.seed().await;

    let resp = server
        .post(
            &format!("/api/orgs/{org_id}/webhooks/facebook"),
            json!({"name": "Carla", "campaign_name": "Spring", "tags": ["vip"]}),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["lead"]["source"], "facebook");
    assert_eq!(body["lead"]["tags"], json!(["vip"]));
    assert_eq!(body["lead"]["assigned_user_id"], agents[0].as_str());

    // An explicit source wins over the integration name.
    let body: Value = server
        .post(
            &format!("/api/orgs/{org_id}/webhooks/facebook"),
            json!({"name": "Davi", "source": "instagram"}),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["lead"]["source"], "instagram");

    let resp = server
        .post(
            &format!("/api/orgs/{org_id}/webhooks/facebook"),
            json!({"phone": "123"}),
        )
        .await;
    assert_eq!(resp.status(), 422);
}

#[tokio::test]
async fn import_assigns_every_lead() {
    let server = TestServer::start().await;
    let (org_id, _, _) = server.seed().await;

    let resp = server
        .post(
            &format!("/api/orgs/{org_id}/leads/import"),
            json!([{"name": "A"}, {"name": "B"}, {"name": "C"}]),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["created"], 3);
    assert_eq!(body["assigned"], 3);

    let resp = server
        .post(
            &format!("/api/orgs/{org_id}/leads/import"),
            json!([{"name": "ok"}, {"name": "  "}]),
        )
        .await;
    assert_eq!(resp.status(), 422);

    let leads: Vec<Value> = server
        .get(&format!("/api/orgs/{org_id}/leads"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(leads.len(), 3);
}

#[tokio::test]
async fn rule_validation_rejects_bad_match() {
    let server = TestServer::start().await;
    let (org_id, _, queue_id) = server.seed().await;

    let resp = server
        .post(
            &format!("/api/orgs/{org_id}/rules"),
            json!({
                "queue_id": queue_id,
                "name": "Night",
                "match": {"schedule": {"days": [1], "start": "22:00", "end": "06:00"}}
            }),
        )
        .await;
    assert_eq!(resp.status(), 422);

    let resp = server
        .post(
            &format!("/api/orgs/{org_id}/rules"),
            json!({"queue_id": "missing", "name": "Ghost"}),
        )
        .await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn rules_reorder_sets_priorities() {
    let server = TestServer::start().await;
    let (org_id, _, queue_id) = server.seed().await;
    let prefix = format!("/api/orgs/{org_id}");

    let second = server
        .create(
            &format!("{prefix}/rules"),
            json!({"queue_id": queue_id, "name": "Facebook", "match": {"source": ["facebook"]}}),
        )
        .await;
    let rules: Vec<Value> = server
        .get(&format!("{prefix}/rules"))
        .await
        .json()
        .await
        .unwrap();
    let first_id = rules[0]["id"].as_str().unwrap().to_string();
    let second_id = second["id"].as_str().unwrap().to_string();

    let resp = server
        .post(
            &format!("{prefix}/rules/reorder"),
            json!({"rule_ids": [second_id, first_id]}),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let reordered: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(reordered[0]["id"], second_id.as_str());
    assert_eq!(reordered[0]["priority"], 1);
    assert_eq!(reordered[1]["priority"], 2);
    assert_eq!(reordered[0]["match"]["source"], json!(["facebook"]));
}

#[tokio::test]
async fn queue_delete_is_blocked_while_referenced() {
    let server = TestServer::start().await;
    let (org_id, _, queue_id) = server.seed().await;

    let resp = Client::new()
        .delete(server.url(&format!("/api/orgs/{org_id}/queues/{queue_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("active rule"));
}

#[tokio::test]
async fn pool_settings_round_trip_clamped() {
    let server = TestServer::start().await;
    let (org_id, _, _) = server.seed().await;
    let pipelines: Vec<Value> = server
        .get(&format!("/api/orgs/{org_id}/pipelines"))
        .await
        .json()
        .await
        .unwrap();
    let pipeline = &pipelines[0];
    assert_eq!(pipeline["is_default"], true);
    assert_eq!(pipeline["stages"].as_array().unwrap().len(), 5);
    let pool_url = server.url(&format!(
        "/api/orgs/{org_id}/pipelines/{}/pool",
        pipeline["id"].as_str().unwrap()
    ));

    let resp = Client::new()
        .put(&pool_url)
        .json(&json!({"enabled": true, "timeout_minutes": 999, "max_redistributions": 0}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["timeout_minutes"], 120);
    assert_eq!(body["max_redistributions"], 1);

    let body: Value = Client::new()
        .get(&pool_url)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["enabled"], true);
    assert_eq!(body["timeout_minutes"], 120);
}

#[tokio::test]
async fn pool_views_and_manual_sweep() {
    let server = TestServer::start().await;
    let (org_id, agents, _) = server.seed().await;
    let prefix = format!("/api/orgs/{org_id}");

    let lead = server
        .create(&format!("{prefix}/leads"), json!({"name": "Pooled"}))
        .await;
    let lead_id = lead["lead"]["id"].as_str().unwrap().to_string();

    let pool: Vec<Value> = server
        .get(&format!("{prefix}/pool/leads"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(pool.len(), 1);

    // Nothing is overdue yet.
    let resp = server.post(&format!("{prefix}/pool/sweep"), json!({})).await;
    assert_eq!(resp.status(), 200);
    let report: Value = resp.json().await.unwrap();
    assert_eq!(report, json!({"redistributed": 0, "skipped": 0}));

    // Two manual moves, then page through the history.
    for target in [&agents[1], &agents[0]] {
        let resp = server
            .post(
                &format!("{prefix}/leads/{lead_id}/reassign"),
                json!({"user_id": target}),
            )
            .await;
        assert_eq!(resp.status(), 200);
    }
    let page: Value = server
        .get(&format!("{prefix}/pool/history?per_page=1&lead_id={lead_id}"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(page["total"], 2);
    assert_eq!(page["per_page"], 1);
    assert_eq!(page["entries"].as_array().unwrap().len(), 1);
    assert_eq!(page["entries"][0]["reason"], "manual");
    assert_eq!(page["entries"][0]["to_user_id"], agents[0].as_str());

    let resp = server
        .post(&format!("{prefix}/leads/{lead_id}/reassign"), json!({"user_id": agents[0]}))
        .await;
    assert_eq!(resp.status(), 409);

    let resp = server
        .post(&format!("{prefix}/leads/{lead_id}/touch"), json!({}))
        .await;
    assert_eq!(resp.status(), 200);
    let pool: Vec<Value> = server
        .get(&format!("{prefix}/pool/leads"))
        .await
        .json()
        .await
        .unwrap();
    assert!(pool.is_empty());
}

#[tokio::test]
async fn manual_sweep_conflicts_with_a_running_sweep() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("lease.db");
    let storage = db::init_sqlite_storage(db_path.to_str().unwrap()).unwrap();
    let org = storage
        .create_organization(&CreateOrganization {
            name: "Busy".to_string(),
            utc_offset_minutes: None,
            notify_webhook_url: None,
        })
        .unwrap();
    assert!(storage
        .try_acquire_lease(SWEEP_LEASE, "scheduler", Utc::now(), 300)
        .unwrap());

    let router = build_router(AppState::new(storage, ServerConfig::default()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let resp = Client::new()
        .post(format!("http://{addr}/api/orgs/{}/pool/sweep", org.id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn teams_and_users_admin() {
    let server = TestServer::start().await;
    let (org_id, agents, queue_id) = server.seed().await;
    let prefix = format!("/api/orgs/{org_id}");

    let team = server
        .create(
            &format!("{prefix}/teams"),
            json!({"name": "Closers", "user_ids": [agents[0]]}),
        )
        .await;
    let team_id = team["id"].as_str().unwrap();
    let resp = server
        .post(
            &format!("{prefix}/teams/{team_id}/members"),
            json!({"user_id": agents[1]}),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let team: Value = resp.json().await.unwrap();
    assert_eq!(team["user_ids"], json!([agents[0], agents[1]]));

    let member = server
        .create(
            &format!("{prefix}/queues/{queue_id}/members"),
            json!({"member": {"kind": "team", "id": team_id}, "weight": 2}),
        )
        .await;
    assert_eq!(member["member"]["kind"], "team");
    assert_eq!(member["weight"], 2);

    let resp = server
        .post(
            &format!("{prefix}/queues/{queue_id}/members"),
            json!({"member": {"kind": "user", "id": agents[0]}, "weight": 0}),
        )
        .await;
    assert_eq!(resp.status(), 422);
    let resp = server
        .post(
            &format!("{prefix}/queues/{queue_id}/members"),
            json!({"member": {"kind": "user", "id": agents[0]}, "weight": 1001}),
        )
        .await;
    assert_eq!(resp.status(), 422);

    let resp = Client::new()
        .patch(server.url(&format!("{prefix}/users/{}", agents[1])))
        .json(&json!({"is_active": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let user: Value = resp.json().await.unwrap();
    assert_eq!(user["is_active"], false);

    let resp = Client::new()
        .delete(server.url(&format!("{prefix}/teams/{team_id}/members/{}", agents[1])))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
}
