//! Dead time and live time through a full builder run.
//!
//! Pause/resume control records travel through the same ordered stream as the
//! channel data, so these tests drive them through `EventBuilder` rather than the
//! tracker directly.

use rust_mbsort::builder::EventBuilder;
use rust_mbsort::config::{MiniballChannel, SortConfig};
use rust_mbsort::hit::{ChannelHit, HitRecord, InfoRecord, ModuleId};

const PAUSE: u8 = 2;
const RESUME: u8 = 3;

fn config() -> SortConfig {
    let mut config = SortConfig::default();
    config.builder.window_width_ns = 500;
    config.daq.n_sfp = 1;
    config.daq.n_board = 2;
    for board in 0..2 {
        config.miniball.push(MiniballChannel {
            sfp: 0,
            board,
            channel: 0,
            cluster: board,
            crystal: 0,
            segment: 0,
        });
    }
    config
}

fn core(board: u8, timestamp: u64) -> HitRecord {
    HitRecord::Channel(ChannelHit {
        module: ModuleId::new(0, board),
        channel: 0,
        raw_integral: 1000.0,
        energy: 1000.0,
        over_threshold: true,
        timestamp,
    })
}

fn control(code: u8, module: Option<(u8, u8)>, timestamp: u64) -> HitRecord {
    HitRecord::Info(InfoRecord {
        code,
        module: module.map(|(sfp, board)| ModuleId::new(sfp, board)),
        timestamp,
    })
}

#[test]
fn test_pause_resume_accumulates_dead_time() {
    let mut builder = EventBuilder::new(&config()).unwrap();
    let records = vec![
        core(0, 1_000),
        control(PAUSE, Some((0, 0)), 10_000),
        control(RESUME, Some((0, 0)), 15_000),
        control(PAUSE, Some((0, 0)), 20_000),
        control(RESUME, Some((0, 0)), 22_000),
        core(0, 101_000),
    ];
    let events = builder.build(records).count();
    assert_eq!(events, 2);

    let summary = builder.summary();
    let module = &summary.modules[0];
    assert_eq!(module.module, ModuleId::new(0, 0));
    assert_eq!(module.pause_count, 2);
    assert_eq!(module.resume_count, 2);
    assert_eq!(module.cumulative_dead_time, 7_000);
    assert_eq!(module.live_time(), 100_000 - 7_000);
    assert_eq!(summary.total_dead_time(), 7_000);
    assert_eq!(summary.info.pause, 2);
    assert_eq!(summary.info.resume, 2);

    // the other module saw nothing
    assert_eq!(summary.modules[1].cumulative_dead_time, 0);
    assert_eq!(summary.modules[1].n_hits, 0);
}

#[test]
fn test_resume_without_pause_counts_from_run_start() {
    let mut builder = EventBuilder::new(&config()).unwrap();
    let records = vec![control(RESUME, Some((0, 1)), 3_000), core(1, 4_000)];
    assert_eq!(builder.build(records).count(), 1);

    let module = builder.health().module(ModuleId::new(0, 1)).unwrap();
    assert_eq!(module.cumulative_dead_time, 3_000);
    assert_eq!(module.pause_count, 0);
    assert_eq!(module.resume_count, 1);
}

#[test]
fn test_second_resume_counts_from_last_pause() {
    let mut builder = EventBuilder::new(&config()).unwrap();
    let records = vec![
        core(0, 1_000),
        control(PAUSE, Some((0, 0)), 5_000),
        control(RESUME, Some((0, 0)), 6_000),
        control(RESUME, Some((0, 0)), 9_000),
        core(0, 21_000),
    ];
    builder.build(records).for_each(drop);

    let module = builder.health().module(ModuleId::new(0, 0)).unwrap();
    assert_eq!(module.resume_count, 2);
    assert_eq!(module.cumulative_dead_time, 1_000 + 4_000);
    assert!(module.cumulative_dead_time <= module.last_timestamp - module.first_timestamp);
    assert_eq!(module.live_time(), 20_000 - 5_000);
}

#[test]
fn test_unresolved_pause_is_left_pending() {
    let mut builder = EventBuilder::new(&config()).unwrap();
    let records = vec![core(0, 100), control(PAUSE, Some((0, 0)), 200)];
    builder.build(records).for_each(drop);

    let module = builder.health().module(ModuleId::new(0, 0)).unwrap();
    assert_eq!(module.pause_pending, Some(200));
    assert_eq!(module.cumulative_dead_time, 0);
}

#[test]
fn test_bad_module_does_not_stop_the_run() {
    let mut builder = EventBuilder::new(&config()).unwrap();
    let records = vec![
        core(0, 100),
        control(PAUSE, Some((3, 0)), 150),
        control(RESUME, None, 160),
        core(1, 10_000),
    ];
    let events: Vec<_> = builder.build(records).collect();
    assert_eq!(events.len(), 2);

    let summary = builder.summary();
    assert_eq!(summary.info.rejected, 2);
    assert_eq!(summary.info.pause, 0);
    assert_eq!(summary.info.resume, 0);
    assert_eq!(summary.total_dead_time(), 0);
}

#[test]
fn test_foreign_module_data_is_counted() {
    let mut builder = EventBuilder::new(&config()).unwrap();
    let stray = HitRecord::Channel(ChannelHit {
        module: ModuleId::new(1, 7),
        channel: 0,
        raw_integral: 10.0,
        energy: 10.0,
        over_threshold: true,
        timestamp: 50,
    });
    builder.build(vec![stray, core(0, 60)]).for_each(drop);

    let summary = builder.summary();
    assert_eq!(summary.foreign_module_hits, 1);
    assert_eq!(summary.unmapped_hits, 1);
    assert_eq!(summary.modules.iter().map(|m| m.n_hits).sum::<u64>(), 1);
}

#[test]
fn test_dead_time_resets_between_files() {
    let mut builder = EventBuilder::new(&config()).unwrap();
    builder
        .build(vec![
            control(PAUSE, Some((0, 0)), 10),
            control(RESUME, Some((0, 0)), 1_010),
        ])
        .for_each(drop);
    assert_eq!(builder.summary().total_dead_time(), 1_000);

    builder.build(vec![core(0, 5)]).for_each(drop);
    assert_eq!(builder.summary().total_dead_time(), 0);
}
