use std::time::Duration;

use adview_manager::{provider::Dummy, AdDeliveryEngine, Phase, Refresh};
use adview_primitives::{
    test_util::{discard_logger, dummy_ad, dummy_ads, HEADER, SIDEBAR},
    AdStatus, Config,
};
use chrono::Utc;
use pretty_assertions::assert_eq;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_stream::StreamExt;
use url::Url;

const CONFIG: &str = r#"
    cache_ttl = 30000
    global_refresh_period = 60000
    fetch_timeout = 3000
    default_interval = 5000
    eligibility_recheck = 10000

    [placement.header]
    interval = 3000

    [placement.sidebar]
    interval = 5000
"#;

fn setup_engine() -> (Dummy, AdDeliveryEngine<Dummy>) {
    let config = Config::try_toml(CONFIG).expect("Valid test config");
    let dummy = Dummy::new();
    let engine = AdDeliveryEngine::new(config, dummy.clone(), &discard_logger());

    (dummy, engine)
}

async fn at(start: Instant, millis: u64) {
    sleep_until(start + Duration::from_millis(millis)).await;
}

#[tokio::test(start_paused = true)]
async fn mounted_slot_shows_the_fetched_ads_and_rotates() {
    let (dummy, engine) = setup_engine();
    dummy.set_ads(&SIDEBAR, dummy_ads(&SIDEBAR, 3, Utc::now()));

    let start = Instant::now();
    let slot = engine.subscribe(&SIDEBAR);

    at(start, 10).await;
    let state = slot.state();
    assert_eq!(Phase::Cycling, state.phase());
    assert_eq!(3, state.eligible.len());
    assert_eq!(
        "sidebar-0",
        state.current().expect("Should show an ad").id.as_str()
    );

    at(start, 5_360).await;
    assert_eq!(1, slot.state().current_index);
    assert_eq!(1, dummy.fetch_count(&SIDEBAR));
}

#[tokio::test(start_paused = true)]
async fn slots_of_a_placement_share_a_single_fetch() {
    let (dummy, engine) = setup_engine();
    dummy.set_ads(&SIDEBAR, dummy_ads(&SIDEBAR, 3, Utc::now()));
    dummy.set_latency(&SIDEBAR, Duration::from_secs(1));

    let start = Instant::now();
    let slots = (0..5)
        .map(|_| engine.subscribe(&SIDEBAR))
        .collect::<Vec<_>>();

    at(start, 1_010).await;

    assert_eq!(1, dummy.fetch_count(&SIDEBAR));
    for slot in &slots {
        assert_eq!(3, slot.state().eligible.len());
    }
}

#[tokio::test(start_paused = true)]
async fn failed_fetch_keeps_showing_the_stale_ads() {
    let (dummy, engine) = setup_engine();
    dummy.set_ads(&SIDEBAR, dummy_ads(&SIDEBAR, 3, Utc::now()));

    let start = Instant::now();
    let slot = engine.subscribe(&SIDEBAR);

    at(start, 31_000).await;
    dummy.set_failing(&SIDEBAR, true);

    let refresh = engine.ensure_fresh(&SIDEBAR).await;
    assert!(refresh.is_failed(), "got {refresh:?}");

    assert_eq!(2, dummy.fetch_count(&SIDEBAR));
    assert_eq!(3, slot.state().eligible.len());
    assert_eq!(
        3,
        engine.cache().get(&SIDEBAR).expect("Stale entry").ads.len()
    );
}

#[tokio::test(start_paused = true)]
async fn global_refresh_reaches_the_mounted_slots() {
    let (dummy, engine) = setup_engine();
    dummy.set_ads(&SIDEBAR, dummy_ads(&SIDEBAR, 3, Utc::now()));

    let start = Instant::now();
    engine.start();
    let slot = engine.subscribe(&SIDEBAR);

    at(start, 5_360).await;
    assert_eq!(1, slot.state().current_index);
    assert_eq!(1, dummy.fetch_count(&SIDEBAR));

    dummy.set_ads(&SIDEBAR, dummy_ads(&SIDEBAR, 2, Utc::now()));

    at(start, 60_010).await;
    let state = slot.state();
    assert_eq!(2, dummy.fetch_count(&SIDEBAR));
    assert_eq!(2, state.eligible.len());
    // the new list restarts the rotation
    assert_eq!(0, state.current_index);

    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn failing_placement_does_not_affect_the_others() {
    let (dummy, engine) = setup_engine();
    dummy.set_ads(&SIDEBAR, dummy_ads(&SIDEBAR, 2, Utc::now()));
    dummy.set_ads(&HEADER, dummy_ads(&HEADER, 2, Utc::now()));
    dummy.set_failing(&HEADER, true);

    engine.start();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(1, dummy.fetch_count(&HEADER));
    assert_eq!(1, dummy.fetch_count(&SIDEBAR));
    assert!(engine.cache().get(&HEADER).is_none());
    assert_eq!(
        2,
        engine.cache().get(&SIDEBAR).expect("Sidebar entry").ads.len()
    );

    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn only_eligible_ads_are_rotated() {
    let (dummy, engine) = setup_engine();
    let now = Utc::now();
    let mut ads = dummy_ads(&SIDEBAR, 3, now);
    ads[0].status = AdStatus::Paused;
    ads[2].status = AdStatus::Pending;
    dummy.set_ads(&SIDEBAR, ads);

    let start = Instant::now();
    let slot = engine.subscribe(&SIDEBAR);

    at(start, 10).await;
    let state = slot.state();
    assert_eq!(Phase::Idle, state.phase());
    assert_eq!(
        "sidebar-1",
        state.current().expect("Should show an ad").id.as_str()
    );

    // a single eligible ad never rotates
    at(start, 20_000).await;
    let state = slot.state();
    assert_eq!(0, state.current_index);
    assert!(!state.transitioning);
}

#[tokio::test(start_paused = true)]
async fn placement_without_ads_renders_nothing() {
    let (_dummy, engine) = setup_engine();

    let start = Instant::now();
    let slot = engine.subscribe(&HEADER);

    at(start, 10_000).await;

    assert_eq!(None, slot.state().current());
    assert_eq!(
        0,
        engine.cache().get(&HEADER).expect("Empty entry").ads.len()
    );
}

#[tokio::test(start_paused = true)]
async fn ads_leaving_their_window_are_dropped_on_recheck() {
    let (dummy, engine) = setup_engine();
    let now = Utc::now();
    let mut ads = dummy_ads(&SIDEBAR, 3, now);
    ads[1].active_until = now + chrono::Duration::milliseconds(200);
    dummy.set_ads(&SIDEBAR, ads);

    let start = Instant::now();
    let slot = engine.subscribe(&SIDEBAR);

    at(start, 10).await;
    assert_eq!(3, slot.state().eligible.len());

    // the active window is checked against the wall clock
    std::thread::sleep(Duration::from_millis(300));

    at(start, 10_010).await;
    let ids = slot
        .state()
        .eligible
        .iter()
        .map(|ad| ad.id.to_string())
        .collect::<Vec<_>>();
    assert_eq!(vec!["sidebar-0", "sidebar-2"], ids);
    // no fetch was needed
    assert_eq!(1, dummy.fetch_count(&SIDEBAR));
}

#[tokio::test(start_paused = true)]
async fn selection_applies_to_every_slot_of_the_placement() {
    let (dummy, engine) = setup_engine();
    dummy.set_ads(&SIDEBAR, dummy_ads(&SIDEBAR, 3, Utc::now()));
    dummy.set_ads(&HEADER, dummy_ads(&HEADER, 3, Utc::now()));

    let start = Instant::now();
    let first = engine.subscribe(&SIDEBAR);
    let second = engine.subscribe(&SIDEBAR);
    let header = engine.subscribe(&HEADER);

    at(start, 1_000).await;
    assert_eq!(2, engine.select_index(&SIDEBAR, 2));

    at(start, 1_010).await;
    assert_eq!(2, first.state().current_index);
    assert_eq!(2, second.state().current_index);
    assert_eq!(0, header.state().current_index);

    // the scheduled rotation moves on from the selection
    at(start, 5_360).await;
    assert_eq!(0, first.state().current_index);
}

#[tokio::test(start_paused = true)]
async fn pausing_on_manual_selection_until_resumed() {
    let mut config = Config::try_toml(CONFIG).expect("Valid test config");
    config.pause_on_manual_select = true;
    let dummy = Dummy::new();
    dummy.set_ads(&SIDEBAR, dummy_ads(&SIDEBAR, 3, Utc::now()));
    let engine = AdDeliveryEngine::new(config, dummy.clone(), &discard_logger());

    let start = Instant::now();
    let slot = engine.subscribe(&SIDEBAR);

    at(start, 1_000).await;
    slot.select_index(1);

    at(start, 16_000).await;
    assert_eq!(1, slot.state().current_index);

    assert_eq!(1, engine.resume(&SIDEBAR));
    at(start, 21_360).await;
    assert_eq!(2, slot.state().current_index);
}

#[tokio::test]
async fn click_navigates_and_reports() {
    let (dummy, engine) = setup_engine();
    let ad = dummy_ad("sidebar-0", &SIDEBAR, Utc::now());

    let mut navigated: Option<Url> = None;
    let report = engine.on_ad_clicked(&ad.id, ad.target_url.as_ref(), |url| {
        navigated = Some(url.clone())
    });
    assert_eq!(ad.target_url, navigated);

    report.await.expect("Report should not panic");
    assert_eq!(1, dummy.click_count(&ad.id));
}

#[tokio::test]
async fn failed_click_report_does_not_block_navigation() {
    let (dummy, engine) = setup_engine();
    dummy.set_failing_clicks(true);
    let ad = dummy_ad("sidebar-0", &SIDEBAR, Utc::now());

    let mut navigated = false;
    let report = engine.on_ad_clicked(&ad.id, ad.target_url.as_ref(), |_| navigated = true);
    assert!(navigated);

    report.await.expect("Report should not panic");
    assert_eq!(0, dummy.click_count(&ad.id));
}

#[tokio::test]
async fn click_without_target_is_still_reported() {
    let (dummy, engine) = setup_engine();
    let ad = dummy_ad("sidebar-0", &SIDEBAR, Utc::now());

    engine
        .on_ad_clicked(&ad.id, None, |_| panic!("Nothing to navigate to"))
        .await
        .expect("Report should not panic");

    assert_eq!(1, dummy.click_count(&ad.id));
}

#[tokio::test(start_paused = true)]
async fn forced_refresh_bypasses_the_ttl() {
    let (dummy, engine) = setup_engine();
    dummy.set_ads(&SIDEBAR, dummy_ads(&SIDEBAR, 3, Utc::now()));

    assert!(matches!(
        engine.ensure_fresh(&SIDEBAR).await,
        Refresh::Updated { ads: 3 }
    ));
    assert!(matches!(engine.ensure_fresh(&SIDEBAR).await, Refresh::Fresh));

    dummy.set_ads(&SIDEBAR, dummy_ads(&SIDEBAR, 1, Utc::now()));
    assert!(matches!(
        engine.refresh(&SIDEBAR).await,
        Refresh::Updated { ads: 1 }
    ));
    assert_eq!(2, dummy.fetch_count(&SIDEBAR));
}

#[tokio::test(start_paused = true)]
async fn slot_states_can_be_consumed_as_a_stream() {
    let (dummy, engine) = setup_engine();
    dummy.set_ads(&SIDEBAR, dummy_ads(&SIDEBAR, 3, Utc::now()));

    let start = Instant::now();
    let slot = engine.subscribe(&SIDEBAR);
    at(start, 10).await;

    let mut states = slot.stream();
    let current = states.next().await.expect("Should yield the current state");
    assert_eq!(3, current.eligible.len());
    assert_eq!(0, current.current_index);

    let shown = loop {
        let state = states.next().await.expect("Slot is mounted");
        if state.current_index == 1 {
            break state;
        }
    };
    assert!(shown.transitioning);
    assert!((5_350..5_400).contains(&start.elapsed().as_millis()));

    engine.shutdown();
    // ends once the slot is unmounted
    while states.next().await.is_some() {}
}
