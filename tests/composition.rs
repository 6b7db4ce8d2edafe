use glam::Vec3;
use marionette::animation::{self, Model, ModelDescription};

fn approx_vec3(a: Vec3, b: Vec3) -> bool {
    (a - b).abs().max_element() <= 1e-3
}

fn constant_track(name: &str, part: &str, rotation: [f32; 3], extra: serde_json::Value) -> serde_json::Value {
    let mut track = serde_json::json!({
        "name": name,
        "length": 1.0,
        "loop_mode": "LOOP",
        "channels": [
            { "part": part, "interpolation": "step", "rotation": [ { "time": 0.0, "value": rotation } ] }
        ]
    });
    if let (Some(target), Some(extra)) = (track.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            target.insert(key.clone(), value.clone());
        }
    }
    track
}

fn model(animations: Vec<serde_json::Value>) -> Model {
    let desc: ModelDescription = serde_json::from_value(serde_json::json!({
        "parts": [
            { "name": "torso", "rotation": [0.0, 20.0, 0.0], "children": [ { "name": "head" } ] },
            { "name": "tail" }
        ],
        "animations": animations
    }))
    .expect("description parses");
    Model::from_description(&desc).expect("model builds")
}

fn play(model: &mut Model, names: &[&str]) {
    for name in names {
        model.track_mut(name).expect("track").play();
    }
}

#[test]
fn higher_priority_replace_masks_lower_tracks_on_shared_parts() {
    let mut model = model(vec![
        constant_track("idle", "head", [0.0, 10.0, 0.0], serde_json::json!({})),
        constant_track("look", "head", [0.0, 45.0, 0.0], serde_json::json!({ "priority": 5, "replace": true })),
        constant_track("swish", "tail", [0.0, 0.0, 15.0], serde_json::json!({})),
    ]);
    play(&mut model, &["idle", "look", "swish"]);
    animation::step(&mut model, 0.05);

    assert!(approx_vec3(model.part_pose("head").expect("head").rotation, Vec3::new(0.0, 45.0, 0.0)));
    assert!(approx_vec3(model.part_pose("tail").expect("tail").rotation, Vec3::new(0.0, 0.0, 15.0)));
    // Masked tracks still advance.
    assert!(model.track("idle").expect("idle").elapsed() > 0.0);
}

#[test]
fn lower_priority_replace_does_not_mask_higher_tracks() {
    let mut model = model(vec![
        constant_track("base", "head", [0.0, 10.0, 0.0], serde_json::json!({ "replace": true })),
        constant_track("accent", "head", [5.0, 0.0, 0.0], serde_json::json!({ "priority": 2 })),
    ]);
    play(&mut model, &["base", "accent"]);
    animation::step(&mut model, 0.05);
    assert!(approx_vec3(model.part_pose("head").expect("head").rotation, Vec3::new(5.0, 10.0, 0.0)));
}

#[test]
fn additive_tracks_sum_by_weight() {
    let mut model = model(vec![
        constant_track("a", "tail", [0.0, 10.0, 0.0], serde_json::json!({ "blend_weight": 0.5 })),
        constant_track("b", "tail", [0.0, 10.0, 0.0], serde_json::json!({ "blend_weight": 2.0 })),
    ]);
    play(&mut model, &["a", "b"]);
    animation::step(&mut model, 0.05);
    assert!(approx_vec3(model.part_pose("tail").expect("tail").rotation, Vec3::new(0.0, 25.0, 0.0)));
}

#[test]
fn override_blends_from_the_base_transform() {
    let mut model = model(vec![constant_track(
        "turn",
        "torso",
        [0.0, 80.0, 0.0],
        serde_json::json!({ "override": true, "blend_time": 0.5 }),
    )]);
    play(&mut model, &["turn"]);
    animation::step(&mut model, 0.25);
    let halfway = model.parts()[model.part_index("torso").expect("torso")].final_pose();
    assert!(approx_vec3(halfway.rotation, Vec3::new(0.0, 50.0, 0.0)), "{halfway:?}");

    animation::step(&mut model, 0.5);
    let settled = model.parts()[model.part_index("torso").expect("torso")].final_pose();
    assert!(approx_vec3(settled.rotation, Vec3::new(0.0, 80.0, 0.0)), "{settled:?}");
}

#[test]
fn parts_without_contributors_return_to_zero() {
    let mut model = model(vec![constant_track("swish", "tail", [0.0, 0.0, 15.0], serde_json::json!({}))]);
    play(&mut model, &["swish"]);
    animation::step(&mut model, 0.05);
    assert!(!model.part_pose("tail").expect("tail").is_zero());

    model.track_mut("swish").expect("swish").pause();
    animation::step(&mut model, 0.05);
    assert!(model.part_pose("tail").expect("tail").is_zero());
    assert!(model.part_pose("head").expect("head").is_zero());
}

#[test]
fn stopping_with_blend_time_fades_out_gradually() {
    let mut model = model(vec![constant_track(
        "swish",
        "tail",
        [0.0, 0.0, 20.0],
        serde_json::json!({ "blend_time": 0.4 }),
    )]);
    play(&mut model, &["swish"]);
    animation::step(&mut model, 1.0);
    model.track_mut("swish").expect("swish").stop();
    animation::step(&mut model, 0.2);
    assert!(approx_vec3(model.part_pose("tail").expect("tail").rotation, Vec3::new(0.0, 0.0, 10.0)));
    animation::step(&mut model, 0.2);
    assert!(model.part_pose("tail").expect("tail").is_zero());
}

#[test]
fn equal_priority_replace_tracks_resolve_in_insertion_order() {
    let nod = |extra| constant_track("nod", "head", [30.0, 0.0, 0.0], extra);
    let shake = |extra| constant_track("shake", "head", [0.0, 40.0, 0.0], extra);
    let flags = || serde_json::json!({ "priority": 3, "replace": true });

    let mut first_nod = model(vec![nod(flags()), shake(flags())]);
    play(&mut first_nod, &["shake", "nod"]);
    animation::step(&mut first_nod, 0.05);
    assert!(approx_vec3(first_nod.part_pose("head").expect("head").rotation, Vec3::new(30.0, 0.0, 0.0)));

    let mut first_shake = model(vec![shake(flags()), nod(flags())]);
    play(&mut first_shake, &["nod", "shake"]);
    animation::step(&mut first_shake, 0.05);
    assert!(approx_vec3(first_shake.part_pose("head").expect("head").rotation, Vec3::new(0.0, 40.0, 0.0)));
}
