use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use gridstore_client::Error as ClientError;
use gridstore_emulator::{Emulator, EmulatorConfig};
use gridstore_test::{
    EmulatorHandle, FixtureError, Mode, RetryPolicy, Step, StepTest, TableFixture,
    ephemeral_table_name,
};
use gridstore_types::{Item, KeySchemaElement, ScanOutput, TableDefinition, TableStatus};
use pretty_assertions::assert_eq;
use serde_json::json;

fn widgets_def() -> TableDefinition {
    TableDefinition::new("widgets", vec![KeySchemaElement::hash("pk")])
}

fn item(pk: &str) -> Item {
    json!({"pk": pk, "payload": "x"}).as_object().cloned().unwrap()
}

async fn scan_count(fixture: &TableFixture) -> usize {
    fixture
        .table()
        .scan()
        .consistent_read(true)
        .send()
        .await
        .expect("scan table")
        .count
}

/// A live-mode fixture pointed at a private emulator, for exercising the
/// code paths the shared emulator shortcuts.
fn private_fixture(project: &str, emulator: &Emulator) -> TableFixture {
    TableFixture::live(project, widgets_def(), "local")
        .expect("valid config")
        .with_endpoint(&format!("http://127.0.0.1:{}", emulator.port()))
        .expect("valid endpoint")
}

#[test_log::test(tokio::test)]
async fn generated_names_are_distinct() {
    let mut first = TableFixture::mocked("naming", widgets_def()).expect("first fixture");
    let mut second = TableFixture::mocked("naming", widgets_def()).expect("second fixture");

    assert!(first.table_name().starts_with("test-naming-"));
    assert!(second.table_name().starts_with("test-naming-"));
    assert_ne!(first.table_name(), second.table_name());

    // The definition is renamed to match.
    assert_eq!(first.table_def().table_name, first.table_name());

    first.start().await.expect("start first");
    second.start().await.expect("start second");

    let tables = first.client().list_tables().await.expect("list tables");
    assert!(tables.contains(&first.table_name().to_owned()));
    assert!(tables.contains(&second.table_name().to_owned()));

    first.delete().await.expect("delete first");
    second.delete().await.expect("delete second");
}

#[test_log::test(tokio::test)]
async fn definition_extras_survive_the_round_trip() {
    let mut definition = widgets_def();
    definition
        .extra
        .insert("billing_mode".into(), json!("on_demand"));

    let mut fixture = TableFixture::mocked("extras", definition).expect("fixture");
    fixture.start().await.expect("start");

    let description = fixture
        .client()
        .describe_table(fixture.table_name())
        .await
        .expect("describe table");
    assert_eq!(description.definition.table_name, fixture.table_name());
    assert_eq!(
        description.definition.extra.get("billing_mode"),
        Some(&json!("on_demand"))
    );

    fixture.delete().await.expect("delete");
}

#[test_log::test(tokio::test)]
async fn start_is_idempotent() {
    let mut fixture = TableFixture::mocked("idempotent", widgets_def()).expect("fixture");
    assert!(fixture.emulator().is_none());

    fixture.start().await.expect("start");
    assert!(fixture.is_running());
    let emulator = fixture.emulator().expect("acquired on start");
    assert_eq!(fixture.config().endpoint().port(), Some(emulator.port()));
    fixture.load(vec![item("a")]).await.expect("load");

    // A second start leaves the table, and its rows, alone.
    fixture.start().await.expect("second start");
    assert_eq!(scan_count(&fixture).await, 1);

    fixture.delete().await.expect("delete");
}

#[test_log::test(tokio::test)]
async fn load_then_scan_round_trips() {
    let mut fixture = TableFixture::mocked("roundtrip", widgets_def()).expect("fixture");

    let fixture_item = item("only");
    fixture
        .load(vec![fixture_item.clone()])
        .await
        .expect("load");

    let output = fixture
        .table()
        .scan()
        .consistent_read(true)
        .send()
        .await
        .expect("scan table");
    assert_eq!(
        output,
        ScanOutput {
            items: vec![fixture_item],
            count: 1,
            scanned_count: 1,
        }
    );

    fixture.delete().await.expect("delete");
}

#[test_log::test(tokio::test)]
async fn empty_resets_the_table() {
    let mut fixture = TableFixture::mocked("emptying", widgets_def()).expect("fixture");

    fixture
        .load(vec![item("a"), item("b"), item("c")])
        .await
        .expect("load");
    assert_eq!(scan_count(&fixture).await, 3);

    fixture.empty().await.expect("empty");
    assert_eq!(scan_count(&fixture).await, 0);

    // The table survives and stays usable.
    let desc = fixture
        .client()
        .describe_table(fixture.table_name())
        .await
        .expect("describe table");
    assert_eq!(desc.status, TableStatus::Active);
    fixture.load(vec![item("d")]).await.expect("load again");
    assert_eq!(scan_count(&fixture).await, 1);

    fixture.delete().await.expect("delete");
}

#[test_log::test(tokio::test)]
async fn empty_creates_the_table_when_needed() {
    let mut fixture = TableFixture::mocked("empty-first", widgets_def()).expect("fixture");

    fixture.empty().await.expect("empty before any start");
    assert!(fixture.is_running());
    assert_eq!(scan_count(&fixture).await, 0);

    fixture.delete().await.expect("delete");
}

#[test_log::test(tokio::test)]
async fn fixtures_are_independent() {
    let mut left = TableFixture::mocked("independent", widgets_def()).expect("left fixture");
    let mut right = TableFixture::mocked("independent", widgets_def()).expect("right fixture");

    left.load(vec![item("a"), item("b")]).await.expect("load left");
    right.start().await.expect("start right");
    assert_eq!(scan_count(&right).await, 0);

    let matching = left
        .client()
        .list_tables()
        .await
        .expect("list tables")
        .into_iter()
        .filter(|name| name.starts_with("test-independent-"))
        .count();
    assert_eq!(matching, 2);

    // Tearing down one table leaves the other untouched.
    left.delete().await.expect("delete left");
    let desc = right
        .client()
        .describe_table(right.table_name())
        .await
        .expect("right table still there");
    assert_eq!(desc.status, TableStatus::Active);
    assert_eq!(scan_count(&right).await, 0);

    right.delete().await.expect("delete right");
}

#[test_log::test(tokio::test)]
async fn delete_then_start_recreates() {
    let mut fixture = TableFixture::mocked("recreate", widgets_def()).expect("fixture");

    fixture.load(vec![item("a")]).await.expect("load");
    fixture.delete().await.expect("delete");
    assert!(!fixture.is_running());
    let err = fixture
        .client()
        .describe_table(fixture.table_name())
        .await
        .expect_err("table is gone");
    assert!(matches!(err, ClientError::TableNotFound { .. }));

    fixture.start().await.expect("start again");
    assert_eq!(scan_count(&fixture).await, 0);

    fixture.delete().await.expect("delete again");
}

#[test_log::test(tokio::test)]
async fn delete_without_start_is_a_noop() {
    // The fixture never starts, so hold an emulator handle of our own to
    // keep something listening for the describe below.
    let _emulator = EmulatorHandle::acquire().await.expect("emulator");
    let mut fixture = TableFixture::mocked("never-started", widgets_def()).expect("fixture");

    fixture.delete().await.expect("no-op delete");

    let err = fixture
        .client()
        .describe_table(fixture.table_name())
        .await
        .expect_err("table was never created");
    assert!(matches!(err, ClientError::TableNotFound { .. }));
}

#[test_log::test(tokio::test)]
async fn fixed_table_names_are_used_verbatim() {
    let fixed = format!("{}-fixed", ephemeral_table_name("alpha"));
    let mut fixture = TableFixture::mocked("alpha", widgets_def())
        .expect("fixture")
        .with_table_name(&fixed);

    assert_eq!(fixture.table_name(), fixed);
    assert_eq!(fixture.table_def().table_name, fixed);

    fixture.start().await.expect("start");
    let tables = fixture.client().list_tables().await.expect("list tables");
    assert!(tables.contains(&fixed));

    fixture.delete().await.expect("delete");
}

#[test_log::test(tokio::test)]
async fn fixed_name_collisions_fail_fast() {
    let fixed = format!("{}-shared", ephemeral_table_name("alpha"));
    let mut first = TableFixture::mocked("alpha", widgets_def())
        .expect("first fixture")
        .with_table_name(&fixed);
    let mut second = TableFixture::mocked("alpha", widgets_def())
        .expect("second fixture")
        .with_table_name(&fixed);

    first.start().await.expect("start first");
    let err = second.start().await.expect_err("name already taken");
    assert!(matches!(
        err,
        FixtureError::Client(ClientError::ApiError { code, .. }) if code.as_u16() == 409
    ));

    first.delete().await.expect("delete first");
}

#[test_log::test(tokio::test)]
async fn run_test_wraps_the_body_in_empty_and_load() {
    let mut fixture = TableFixture::mocked("runtest", widgets_def()).expect("fixture");

    let observed = Arc::new(AtomicUsize::new(usize::MAX));
    let captured = Arc::clone(&observed);
    fixture
        .run_test(
            "widgets are visible",
            vec![item("a"), item("b")],
            Box::new(move |state| {
                async move {
                    let output = state
                        .table()
                        .scan()
                        .consistent_read(true)
                        .send()
                        .await
                        .expect("scan inside the test body");
                    captured.store(output.count, Ordering::SeqCst);
                }
                .boxed()
            }),
        )
        .await;

    assert_eq!(observed.load(Ordering::SeqCst), 2);

    // The trailing empty step ran.
    assert_eq!(scan_count(&fixture).await, 0);

    fixture.delete().await.expect("delete");
}

#[test_log::test(tokio::test)]
async fn run_test_skips_the_load_step_without_fixtures() {
    let mut fixture = TableFixture::mocked("runtest-bare", widgets_def()).expect("fixture");

    let ran = Arc::new(AtomicBool::new(false));
    let captured = Arc::clone(&ran);
    fixture
        .run_test(
            "runs against an empty table",
            vec![],
            Box::new(move |state| {
                async move {
                    let output = state
                        .table()
                        .scan()
                        .consistent_read(true)
                        .send()
                        .await
                        .expect("scan inside the test body");
                    assert_eq!(output.count, 0);
                    captured.store(true, Ordering::SeqCst);
                }
                .boxed()
            }),
        )
        .await;

    assert!(ran.load(Ordering::SeqCst));

    fixture.delete().await.expect("delete");
}

#[test_log::test(tokio::test)]
async fn step_test_composes_lifecycle_steps() {
    let mut fixture = TableFixture::mocked("steps", widgets_def()).expect("fixture");

    StepTest::new(
        &mut fixture,
        vec![
            Step::Create,
            Step::Load(vec![item("a")]),
            Step::Custom(Box::new(|state| {
                async move {
                    let output = state
                        .table()
                        .scan()
                        .consistent_read(true)
                        .send()
                        .await
                        .expect("scan inside the custom step");
                    assert_eq!(output.count, 1);
                }
                .boxed()
            })),
            Step::Empty,
            Step::Delete,
        ],
    )
    .run()
    .await;

    assert!(!fixture.is_running());
}

#[test_log::test(tokio::test)]
async fn scan_driven_empty_drains_every_page() {
    let emulator = Emulator::spawn(EmulatorConfig::default().with_ephemeral_port())
        .await
        .expect("spawn private emulator");
    let mut fixture = private_fixture("drain", &emulator);
    assert_eq!(fixture.mode(), Mode::Live);

    // Enough items that the backing scan spans many pages.
    let items: Vec<Item> = (0..998).map(|i| item(&format!("item-{i:04}"))).collect();
    fixture.load(items).await.expect("load");
    assert_eq!(scan_count(&fixture).await, 998);

    fixture.empty().await.expect("empty");

    assert_eq!(scan_count(&fixture).await, 0);
    let desc = fixture
        .client()
        .describe_table(fixture.table_name())
        .await
        .expect("describe table");
    assert_eq!(desc.status, TableStatus::Active);
    assert_eq!(desc.item_count, 0);
}

#[test_log::test(tokio::test)]
async fn unprocessed_residue_is_retried_to_convergence() {
    let emulator = Emulator::spawn(EmulatorConfig::default().with_ephemeral_port())
        .await
        .expect("spawn private emulator");
    emulator.inject_unprocessed(9);

    let mut fixture = private_fixture("retry", &emulator);
    let items: Vec<Item> = (0..60).map(|i| item(&format!("item-{i:02}"))).collect();
    fixture.load(items).await.expect("load");

    // Every refused entry was eventually applied...
    assert_eq!(scan_count(&fixture).await, 60);
    // ...via one resubmission on top of the three initial chunks.
    assert_eq!(emulator.batch_requests(), 4);
}

#[test_log::test(tokio::test)]
async fn capped_retries_surface_as_errors() {
    let emulator = Emulator::spawn(EmulatorConfig::default().with_ephemeral_port())
        .await
        .expect("spawn private emulator");
    emulator.inject_unprocessed(1_000_000);

    let mut fixture = private_fixture("exhaust", &emulator).with_retry_policy(RetryPolicy {
        base_delay: Duration::from_millis(1),
        max_attempts: NonZeroU32::new(2),
    });

    let items: Vec<Item> = (0..5).map(|i| item(&format!("item-{i}"))).collect();
    let err = fixture.load(items).await.expect_err("every batch refused");
    assert!(matches!(
        err,
        FixtureError::RetriesExhausted {
            remaining: 5,
            attempts: 2,
        }
    ));
}

#[test_log::test(tokio::test)]
async fn close_refuses_live_mode() {
    let mut fixture =
        TableFixture::live("closing", widgets_def(), "eu-north-3").expect("valid config");

    let err = fixture.close().await.expect_err("nothing to close");
    assert!(matches!(err, FixtureError::CloseInLiveMode));
}
