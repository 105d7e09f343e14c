//! Integration tests for hook stats: delivery bookkeeping across a restart.

use chrono::NaiveDate;
use hook_stats::{locator, token, Registry, SnapshotStore, Verdict, WebhookPayload};

fn fixture_payload(tag: &str) -> WebhookPayload {
  let json = format!(
    r#"{{
      "type": "PUSH_ARTIFACT",
      "occur_at": 1716714783,
      "operator": "admin",
      "event_data": {{
        "resources": [
          {{"digest": "sha256:551816281922709f", "tag": "{tag}", "resource_url": "harbor.example.com/build-hook/test-app:{tag}"}}
        ],
        "repository": {{
          "date_created": 1716714783,
          "name": "test-app",
          "namespace": "build-hook",
          "repo_full_name": "build-hook/test-app",
          "repo_type": "public"
        }}
      }}
    }}"#
  );
  serde_json::from_str(&json).unwrap()
}

/// Mirror of what the ingress does with one delivery.
fn deliver(registry: &Registry, payload: &WebhookPayload) -> Verdict {
  let now = NaiveDate::from_ymd_opt(2025, 1, 1)
    .unwrap()
    .and_hms_opt(0, 0, 0)
    .unwrap();
  let resource = &payload.event_data.resources[0];
  let loc = locator::parse(&resource.resource_url).unwrap();
  registry.add_calls(loc.app, 1);
  let sign = token::sign(&payload.event_data);
  let create_time = token::create_time_from_tag(&resource.tag, &now);
  registry.admit(loc.app, &sign, &create_time)
}

#[test]
fn duplicate_delivery_counts_call_but_keeps_token() {
  let registry = Registry::new();
  let payload = fixture_payload("p0_20240526171000");

  assert_eq!(deliver(&registry, &payload), Verdict::Accept);
  let token_after_first = registry.get("test-app").unwrap().once;

  assert_eq!(deliver(&registry, &payload), Verdict::Duplicate);
  let record = registry.get("test-app").unwrap();
  assert_eq!(record.calls, 2);
  assert_eq!(record.once, token_after_first);
}

#[test]
fn out_of_order_retry_is_stale() {
  let registry = Registry::new();
  assert_eq!(deliver(&registry, &fixture_payload("p0_20250101000000")), Verdict::Accept);
  assert_eq!(deliver(&registry, &fixture_payload("p0_20241231235959")), Verdict::Stale);
  assert_eq!(deliver(&registry, &fixture_payload("p0_20250101000001")), Verdict::Accept);

  let record = registry.get("test-app").unwrap();
  assert_eq!(record.calls, 3);
  assert_eq!(record.once.create_time.as_str(), "20250101000001");
}

#[test]
fn restart_restores_identical_records() {
  let dir = tempfile::tempdir().unwrap();
  let store = SnapshotStore::new(dir.path().join("stats.json"));

  let before = Registry::seeded(["x", "y"]);
  before.add_calls("x", 5);
  before.add_errors("x", 2);
  deliver(&before, &fixture_payload("p0_20240526171000"));
  store.flush(&before).unwrap();

  // New process: seed from configuration, then restore.
  let after = Registry::seeded(["x", "y", "z"]);
  assert_eq!(store.restore_into(&after).unwrap(), 3);

  let x = after.get("x").unwrap();
  assert_eq!(x.calls, 5);
  assert_eq!(x.errors, 2);
  assert_eq!(after.get("test-app"), before.get("test-app"));
  assert_eq!(after.get("z").unwrap().calls, 0);

  // Redelivery of the already accepted payload is still a duplicate.
  assert_eq!(
    deliver(&after, &fixture_payload("p0_20240526171000")),
    Verdict::Duplicate
  );
}
