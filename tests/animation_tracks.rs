use glam::Vec3;
use marionette::animation::{self, LoopMode, Model, ModelDescription, PlayState};

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() <= 1e-3
}

fn approx_vec3(a: Vec3, b: Vec3) -> bool {
    (a - b).abs().max_element() <= 1e-3
}

fn biped() -> Model {
    let desc = ModelDescription::load("assets/models/biped.json").expect("load biped model");
    Model::from_description(&desc).expect("build biped model")
}

fn run(model: &mut Model, seconds: f32, dt: f32) -> Vec<String> {
    let steps = (seconds / dt).round() as usize;
    let mut finished = Vec::new();
    for _ in 0..steps {
        finished.extend(animation::step(model, dt));
    }
    finished
}

#[test]
fn looping_wave_wraps_after_five_seconds() {
    let mut model = biped();
    model.track_mut("wave").expect("wave track").play();
    run(&mut model, 5.0, 0.1);

    let wave = model.track("wave").expect("wave track");
    assert!(approx(wave.elapsed(), 1.0), "elapsed {}", wave.elapsed());
    assert!(wave.is_playing());
    let arm = model.part_pose("arm_left").expect("arm pose");
    assert!(approx_vec3(arm.rotation, Vec3::new(0.0, 0.0, 90.0)), "{arm:?}");
}

#[test]
fn once_track_reports_finish_a_single_time_and_keeps_last_frame_time() {
    let mut model = biped();
    model.track_mut("nod").expect("nod track").play();
    let finished = run(&mut model, 3.0, 0.25);
    assert_eq!(finished, vec!["nod".to_string()]);

    let nod = model.track("nod").expect("nod track");
    assert_eq!(nod.play_state(), PlayState::Stopped);
    assert_eq!(nod.elapsed(), 1.0);
    // Stopped tracks no longer contribute.
    assert!(model.part_pose("head").expect("head pose").is_zero());
}

#[test]
fn start_does_not_restart_a_running_track() {
    let mut model = biped();
    model.track_mut("wave").expect("wave").start();
    run(&mut model, 0.5, 0.1);
    model.track_mut("wave").expect("wave").start();
    run(&mut model, 0.5, 0.1);
    assert!(approx(model.track("wave").expect("wave").elapsed(), 1.0));
}

#[test]
fn stop_all_keeps_time_and_cease_all_rewinds() {
    let mut model = biped();
    model.track_mut("wave").expect("wave").play();
    model.track_mut("nod").expect("nod").play();
    run(&mut model, 0.5, 0.1);

    model.stop_all();
    animation::step(&mut model, 0.1);
    assert!(model.tracks().all(|track| track.play_state() == PlayState::Stopped));
    assert!(approx(model.track("wave").expect("wave").elapsed(), 0.5));
    assert!(model.poses().iter().all(|(_, pose)| pose.is_zero()));

    model.cease_all();
    assert!(model.tracks().all(|track| track.elapsed() == 0.0));
}

#[test]
fn negative_speed_runs_a_loop_backwards() {
    let mut model = biped();
    let wave = model.track_mut("wave").expect("wave");
    wave.set_speed(-1.0);
    wave.play();
    run(&mut model, 0.5, 0.1);
    let wave = model.track("wave").expect("wave");
    assert!(approx(wave.elapsed(), 1.5), "elapsed {}", wave.elapsed());
    assert_eq!(wave.speed(), -1.0);
    let arm = model.part_pose("arm_left").expect("arm pose");
    assert!(approx_vec3(arm.rotation, Vec3::new(0.0, 0.0, 45.0)), "{arm:?}");
}

#[test]
fn loop_time_is_periodic_in_the_track_length() {
    let mut first = biped();
    let mut second = biped();
    for model in [&mut first, &mut second] {
        model.track_mut("wave").expect("wave").play();
    }
    run(&mut first, 0.3, 0.1);
    run(&mut second, 4.3, 0.1);
    let a = first.track("wave").expect("wave").elapsed();
    let b = second.track("wave").expect("wave").elapsed();
    assert!(approx(a, b), "{a} vs {b}");
}

#[test]
fn switching_to_hold_clamps_elapsed_time() {
    let mut model = biped();
    let wave = model.track_mut("wave").expect("wave");
    wave.set_loop_mode(LoopMode::Hold);
    wave.play();
    run(&mut model, 6.0, 0.5);
    let wave = model.track("wave").expect("wave");
    assert_eq!(wave.elapsed(), 2.0);
    assert!(wave.is_playing());
}

#[test]
fn invalid_descriptions_are_rejected() {
    let unknown_part: ModelDescription = serde_json::from_value(serde_json::json!({
        "parts": [ { "name": "body" } ],
        "animations": [ { "name": "a", "length": 1.0, "channels": [ { "part": "tail" } ] } ]
    }))
    .expect("parse");
    assert!(Model::from_description(&unknown_part).is_err());

    let duplicate_parts: ModelDescription = serde_json::from_value(serde_json::json!({
        "parts": [ { "name": "body", "children": [ { "name": "body" } ] } ]
    }))
    .expect("parse");
    assert!(Model::from_description(&duplicate_parts).is_err());

    let negative_length: ModelDescription = serde_json::from_value(serde_json::json!({
        "animations": [ { "name": "a", "length": -1.0 } ]
    }))
    .expect("parse");
    assert!(Model::from_description(&negative_length).is_err());
}
