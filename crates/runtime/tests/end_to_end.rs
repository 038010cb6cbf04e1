mod common;

use std::time::Duration;

use common::{FRAME, Host, drain, init_tracing};
use encounter_core::{
    ConfigError, DeathCause, EncounterConfig, EncounterFlags, EncounterOutcome, EncounterState,
    InterruptOutcome, PatternDefinition, PatternId, PatternOutcome, PhaseAction, PhaseThreshold,
    Vec2,
};
use encounter_runtime::{
    Encounter, EncounterError, Event, InterruptGateway, LifecycleEvent, PatternEvent,
    PatternFactory, Script, TaskError, Topic, pattern,
};

fn calm(id: u32, name: &'static str) -> PatternDefinition<PatternFactory> {
    pattern(PatternId(id), name, move || {
        Script::new(name).delay(Duration::from_millis(100))
    })
    .phases([0, 1])
    .excludes(EncounterFlags::ENRAGED)
}

fn enraged(id: u32, name: &'static str) -> PatternDefinition<PatternFactory> {
    pattern(PatternId(id), name, move || {
        Script::new(name)
            .spawn("orb", Vec2::ZERO, Vec2::new(0.0, -3.0))
            .spawn("orb", Vec2::ZERO, Vec2::new(0.0, 3.0))
            .delay(Duration::from_millis(200))
    })
    .phases([2])
    .requires(EncounterFlags::ENRAGED)
}

fn started(events: &[Event]) -> Vec<PatternId> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Pattern(PatternEvent::Started { pattern, .. }) => Some(*pattern),
            _ => None,
        })
        .collect()
}

#[test]
fn enrage_rotation_interrupt_and_death() {
    init_tracing();
    let host = Host::new();
    let mut encounter = Encounter::builder()
        .seed(0x5EED)
        .patterns([calm(10, "jab"), calm(11, "hook")])
        .patterns([
            enraged(1, "meteor"),
            enraged(2, "nova"),
            enraged(3, "comet"),
            enraged(4, "flare"),
        ])
        .thresholds([
            PhaseThreshold::new(0.70).with_action(PhaseAction::Cue("second_wind".into())),
            PhaseThreshold::new(0.40)
                .with_action(PhaseAction::SetFlags(EncounterFlags::ENRAGED))
                .with_action(PhaseAction::Cue("enraged".into())),
        ])
        .health(host.health())
        .spawner(host.spawner())
        .effects(host.effects())
        .persistence(host.persistence())
        .build()
        .expect("encounter should build");
    let mut patterns = encounter.subscribe(Topic::Pattern);
    let mut lifecycle = encounter.subscribe(Topic::Lifecycle);

    encounter.start().expect("idle encounter starts");
    assert_eq!(encounter.state(), EncounterState::Intro);
    encounter.tick(FRAME);
    assert_eq!(encounter.state(), EncounterState::Battling);

    for _ in 0..6 {
        encounter.tick(FRAME);
    }
    let opening = started(&drain(&mut patterns));
    assert!(!opening.is_empty());
    assert!(opening.iter().all(|id| [PatternId(10), PatternId(11)].contains(id)));

    // One hit crosses both bands; they fire on consecutive ticks.
    host.set_health(0.39);
    encounter.tick(FRAME);
    encounter.tick(FRAME);
    let context = encounter.context().expect("encounter is running");
    assert_eq!(context.phase_index(), 2);
    assert!(context.has_flags(EncounterFlags::ENRAGED));
    assert_eq!(host.cues(), vec!["second_wind", "enraged"]);
    drain(&mut patterns);

    let mut picks = Vec::new();
    for _ in 0..60 {
        encounter.tick(FRAME);
        picks.extend(started(&drain(&mut patterns)));
        if picks.len() == 10 {
            break;
        }
    }
    assert_eq!(picks.len(), 10);
    assert!(picks.iter().all(|id| (1..=4).contains(&id.0)));
    for pair in picks.windows(2) {
        assert_ne!(pair[0], pair[1], "rotation repeated: {picks:?}");
    }

    let active = encounter.active_pattern().expect("a pattern just started");
    assert_eq!(Some(&active.id), picks.last());
    assert_eq!(encounter.live_hazards(), 2);

    let interrupted_at = encounter.frame();
    encounter
        .request_interrupt()
        .expect("battling encounter accepts an interrupt");
    assert_eq!(encounter.state(), EncounterState::Interrupted);
    encounter.tick(FRAME);

    assert_eq!(encounter.live_hazards(), 0);
    assert!(encounter.active_pattern().is_none());
    assert!(drain(&mut patterns).contains(&Event::Pattern(PatternEvent::Finished {
        pattern: active.id,
        outcome: PatternOutcome::Cancelled,
        frame: interrupted_at,
    })));

    encounter
        .resolve_interrupt(InterruptOutcome::Failure)
        .expect("interrupted encounter resolves");
    assert_eq!(encounter.state(), EncounterState::Dying);
    assert_eq!(encounter.death_cause(), Some(DeathCause::InterruptFailed));

    for _ in 0..5 {
        encounter.tick(FRAME);
    }
    assert_eq!(encounter.state(), EncounterState::Dead);
    assert!(encounter.context().is_none());

    let endings: Vec<EncounterOutcome> = drain(&mut lifecycle)
        .into_iter()
        .filter_map(|event| match event {
            Event::Lifecycle(LifecycleEvent::EncounterEnded { outcome, .. }) => Some(outcome),
            _ => None,
        })
        .collect();
    assert_eq!(endings, vec![EncounterOutcome::Dead]);
    assert_eq!(host.log.borrow().endings, vec![EncounterOutcome::Dead]);
    assert_eq!(host.log.borrow().phases, vec![1, 2]);
}

#[test]
fn intro_and_death_sequences_run_as_scripted_patterns() {
    init_tracing();
    let host = Host::new();
    let config = EncounterConfig::default()
        .with_intro(PatternId(100))
        .with_death_sequence(PatternId(101));
    let mut encounter = Encounter::builder()
        .config(config)
        .pattern(
            pattern(PatternId(1), "jab", || Script::new("jab").cue("jab")).phases([0]),
        )
        .pattern(pattern(PatternId(100), "intro", || {
            Script::new("intro")
                .cue("intro")
                .delay(Duration::from_millis(200))
        }))
        .pattern(pattern(PatternId(101), "death", || {
            Script::new("death")
                .cue("death_throes")
                .delay(Duration::from_millis(200))
                .cue("collapse")
        }))
        .health(host.health())
        .effects(host.effects())
        .start()
        .expect("encounter should start");

    encounter.tick(FRAME);
    encounter.tick(FRAME);
    assert_eq!(encounter.state(), EncounterState::Intro);
    assert_eq!(host.cues(), vec!["intro"]);

    encounter.tick(FRAME);
    assert_eq!(encounter.state(), EncounterState::Battling);
    encounter.tick(FRAME);
    assert_eq!(host.cues(), vec!["intro", "jab"]);

    encounter.notify_death().expect("battling boss can die");
    assert_eq!(encounter.state(), EncounterState::Dying);
    assert_eq!(encounter.death_cause(), Some(DeathCause::Forced));

    for _ in 0..5 {
        encounter.tick(FRAME);
    }
    assert_eq!(encounter.outcome(), Some(EncounterOutcome::Dead));
    assert_eq!(
        host.cues(),
        vec!["intro", "jab", "death_throes", "collapse"]
    );
}

#[test]
fn finishing_the_intro_early_cancels_it() {
    init_tracing();
    let host = Host::new();
    let mut encounter = Encounter::builder()
        .config(EncounterConfig::default().with_intro(PatternId(100)))
        .pattern(
            pattern(PatternId(1), "jab", || Script::new("jab").cue("jab")).phases([0]),
        )
        .pattern(pattern(PatternId(100), "intro", || {
            Script::new("intro")
                .delay(Duration::from_secs(5))
                .on_cancel_cue("intro_skipped")
        }))
        .health(host.health())
        .effects(host.effects())
        .start()
        .expect("encounter should start");

    encounter.tick(FRAME);
    encounter.finish_intro().expect("intro can be skipped");
    assert_eq!(encounter.state(), EncounterState::Battling);
    encounter.tick(FRAME);

    assert_eq!(host.cues(), vec!["intro_skipped", "jab"]);
    assert!(encounter.finish_intro().is_err());
}

#[test]
fn health_reaching_zero_ends_the_encounter_once() {
    init_tracing();
    let host = Host::new();
    let mut encounter = Encounter::builder()
        .pattern(
            pattern(PatternId(1), "barrage", || {
                Script::new("barrage")
                    .spawn("orb", Vec2::ZERO, Vec2::ZERO)
                    .delay(Duration::from_secs(5))
            })
            .phases([0]),
        )
        .health(host.health())
        .spawner(host.spawner())
        .persistence(host.persistence())
        .start()
        .expect("encounter should start");

    encounter.tick(FRAME);
    assert_eq!(encounter.live_hazards(), 1);

    host.set_health(0.0);
    encounter.tick(FRAME);
    encounter.tick(FRAME);

    assert_eq!(encounter.state(), EncounterState::Dead);
    assert_eq!(encounter.death_cause(), Some(DeathCause::HealthDepleted));
    assert_eq!(encounter.live_hazards(), 0);
    assert_eq!(host.destroyed().len(), 1);
    assert_eq!(host.log.borrow().endings, vec![EncounterOutcome::Dead]);
    assert!(encounter.notify_death().is_err());
}

#[test]
fn abort_tears_down_with_abandoned_outcome() {
    init_tracing();
    let host = Host::new();
    let mut encounter = Encounter::builder()
        .pattern(
            pattern(PatternId(1), "barrage", || {
                Script::new("barrage")
                    .spawn("orb", Vec2::ZERO, Vec2::ZERO)
                    .delay(Duration::from_secs(5))
            })
            .phases([0]),
        )
        .health(host.health())
        .spawner(host.spawner())
        .persistence(host.persistence())
        .start()
        .expect("encounter should start");
    let mut lifecycle = encounter.subscribe(Topic::Lifecycle);

    encounter.tick(FRAME);
    encounter.abort().expect("running encounter can be aborted");

    assert_eq!(encounter.state(), EncounterState::Dead);
    assert_eq!(encounter.outcome(), Some(EncounterOutcome::Abandoned));
    assert_eq!(encounter.live_hazards(), 0);
    assert_eq!(encounter.live_tasks(), 0);
    assert!(encounter.abort().is_err());

    let frame = encounter.frame();
    encounter.tick(FRAME);
    assert_eq!(encounter.frame(), frame);

    assert!(drain(&mut lifecycle).contains(&Event::Lifecycle(
        LifecycleEvent::EncounterEnded {
            outcome: EncounterOutcome::Abandoned,
            frame,
        }
    )));
}

#[test]
fn build_rejects_incomplete_configuration() {
    init_tracing();
    let host = Host::new();

    let no_health = Encounter::builder()
        .pattern(pattern(PatternId(1), "jab", || Script::new("jab")).phases([0]))
        .build();
    assert!(matches!(no_health, Err(EncounterError::MissingHealthProvider)));

    let empty = Encounter::builder().health(host.health()).build();
    assert!(matches!(
        empty,
        Err(EncounterError::Config(ConfigError::EmptyCatalog))
    ));

    let unknown_rush = Encounter::builder()
        .pattern(pattern(PatternId(1), "jab", || Script::new("jab")).phases([0]))
        .threshold(PhaseThreshold::new(0.2).with_action(PhaseAction::Rush(PatternId(7))))
        .health(host.health())
        .build();
    assert!(matches!(
        unknown_rush,
        Err(EncounterError::Config(ConfigError::UnknownPattern {
            id: PatternId(7),
            ..
        }))
    ));

    let duplicate = Encounter::builder()
        .pattern(pattern(PatternId(1), "jab", || Script::new("jab")))
        .pattern(pattern(PatternId(1), "hook", || Script::new("hook")))
        .health(host.health())
        .build();
    assert!(matches!(
        duplicate,
        Err(EncounterError::Config(ConfigError::DuplicatePattern(PatternId(1))))
    ));
}

#[test]
fn operations_outside_their_state_are_refused() {
    init_tracing();
    let host = Host::new();
    let mut encounter = Encounter::builder()
        .pattern(pattern(PatternId(1), "jab", || Script::new("jab")).phases([0]))
        .health(host.health())
        .build()
        .expect("encounter should build");

    assert!(matches!(
        encounter.request_interrupt(),
        Err(EncounterError::InvalidTransition {
            state: EncounterState::Idle,
            ..
        })
    ));
    assert!(encounter.notify_death().is_err());

    encounter.start().expect("idle encounter starts");
    assert!(encounter.start().is_err());
    encounter.tick(FRAME);

    assert!(
        encounter
            .resolve_interrupt(InterruptOutcome::Success)
            .is_err()
    );
    encounter.force_interrupt().expect("battling encounter interrupts");
    assert!(encounter.request_interrupt().is_err());
    assert!(
        encounter
            .context()
            .is_some_and(|ctx| ctx.has_flags(EncounterFlags::INTERRUPTED))
    );

    encounter
        .resolve_interrupt(InterruptOutcome::Success)
        .expect("interrupted encounter resolves");
    assert_eq!(encounter.state(), EncounterState::Battling);
    assert!(
        encounter
            .context()
            .is_some_and(|ctx| !ctx.has_flags(EncounterFlags::INTERRUPTED))
    );
}

#[test]
fn missing_spawn_resource_skips_the_step() {
    init_tracing();
    let host = Host::new();
    host.refuse("laser");
    let mut encounter = Encounter::builder()
        .pattern(
            pattern(PatternId(1), "crossfire", || {
                Script::new("crossfire")
                    .spawn("laser", Vec2::ZERO, Vec2::new(5.0, 0.0))
                    .spawn("orb", Vec2::ZERO, Vec2::new(0.0, 1.0))
                    .cue("crossfire")
            })
            .phases([0]),
        )
        .health(host.health())
        .spawner(host.spawner())
        .effects(host.effects())
        .start()
        .expect("encounter should start");
    let mut patterns = encounter.subscribe(Topic::Pattern);

    encounter.tick(FRAME);

    assert_eq!(host.spawned(), 1);
    assert_eq!(host.cues(), vec!["crossfire"]);
    assert!(drain(&mut patterns).iter().any(|event| matches!(
        event,
        Event::Pattern(PatternEvent::Finished {
            outcome: PatternOutcome::Completed,
            ..
        })
    )));
}

#[test]
fn script_errors_fault_the_pattern_and_rotation_continues() {
    init_tracing();
    let host = Host::new();
    let mut encounter = Encounter::builder()
        .pattern(
            pattern(PatternId(1), "misfire", || {
                Script::new("misfire")
                    .cue("misfire")
                    .then(|_| Err(TaskError::Script("boom".into())))
                    .cue("unreachable")
            })
            .phases([0]),
        )
        .health(host.health())
        .effects(host.effects())
        .start()
        .expect("encounter should start");
    let mut patterns = encounter.subscribe(Topic::Pattern);

    encounter.tick(FRAME);

    let events = drain(&mut patterns);
    assert!(events.iter().any(|event| matches!(
        event,
        Event::Pattern(PatternEvent::Faulted { pattern: PatternId(1), error, .. })
            if error.contains("boom")
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        Event::Pattern(PatternEvent::Finished {
            outcome: PatternOutcome::Faulted,
            ..
        })
    )));
    assert_eq!(encounter.state(), EncounterState::Battling);
    assert_eq!(
        encounter.context().and_then(|ctx| ctx.last_pattern_id()),
        None
    );

    encounter.tick(FRAME);
    assert_eq!(host.cues(), vec!["misfire", "misfire"]);
}
