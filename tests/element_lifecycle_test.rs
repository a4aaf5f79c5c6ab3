//! Element state machine: build, fallback single-shot, stale-completion
//! rejection, zero-width and prerender guards, SSR adoption, and
//! attribute propagation.

mod common;

use common::Harness;
use respimg::element::{ElementState, CLASS_GHOST};
use respimg::{ElementEvent, Size};
use std::time::Duration;

#[test]
fn first_layout_builds_the_inner_image_node() {
  let mut h = Harness::new(&[("src", "https://cdn.test/a.jpg"), ("alt", "a sunset"), ("title", "Sunset")]);
  h.fetcher.insert_png("https://cdn.test/a.jpg", 4, 4);

  assert_eq!(h.element.state(), ElementState::Unbuilt);
  h.layout_and_settle();

  let img = h.element.img_node().expect("img created");
  assert_eq!(h.model.tag_name(img), "img");
  assert_eq!(h.model.get_attribute_ref(img, "alt"), Some("a sunset"));
  assert_eq!(h.model.get_attribute_ref(img, "title"), Some("Sunset"));
  assert_eq!(h.element.state(), ElementState::Loaded);
}

#[test]
fn ssr_element_adopts_the_server_rendered_image_node() {
  let mut h = Harness::new(&[("src", "https://cdn.test/a.jpg"), ("ssr", "")]);
  h.fetcher.insert_png("https://cdn.test/a.jpg", 4, 4);

  let prerendered = h.model.create_element("img");
  h.model.append_child(h.container, prerendered);

  h.layout_and_settle();
  assert_eq!(h.element.img_node(), Some(prerendered));
  assert_eq!(h.model.children(h.container).len(), 1);
}

#[test]
fn zero_width_layout_skips_selection_and_loading() {
  let mut h = Harness::new(&[("src", "https://cdn.test/a.jpg")]);
  h.layout.set_layout_width(0.0);

  h.element.layout(&mut h.model).expect("zero-width layout succeeds");
  assert_eq!(h.element.state(), ElementState::Initialized);
  assert_eq!(h.element.pending_sessions(), 0);
  assert_eq!(h.element.diagnostics().loads_started, 0);
  assert!(h.element.current_url().is_none());
}

#[test]
fn noprerender_element_waits_for_the_display_phase() {
  let mut h = Harness::new(&[("src", "https://cdn.test/a.jpg"), ("noprerender", "")]);
  h.fetcher.insert_png("https://cdn.test/a.jpg", 4, 4);
  h.layout.set_prerendering(true);

  h.element.layout(&mut h.model).unwrap();
  assert_eq!(h.element.pending_sessions(), 0);

  h.layout.set_prerendering(false);
  h.layout_and_settle();
  assert_eq!(h.element.state(), ElementState::Loaded);
}

#[test]
fn fallback_fires_once_and_only_once() {
  let mut h = Harness::new(&[("src", "https://missing.test/a.jpg")]);
  let fallback_child = h.model.create_element("div");
  h.model.set_attribute(fallback_child, "fallback", "");
  h.model.set_opacity(fallback_child, 0.0);
  h.model.append_child(h.container, fallback_child);

  // First failure: the fallback transition fires.
  let events = h.layout_and_settle();
  assert!(matches!(
    events.as_slice(),
    [ElementEvent::LoadFailed {
      fallback_entered: true,
      ..
    }]
  ));
  assert_eq!(h.element.state(), ElementState::Fallback);

  let img = h.element.img_node().unwrap();
  assert!(h.model.has_class(img, CLASS_GHOST));
  assert_eq!(h.model.opacity(fallback_child), 1.0);

  // Second failure on a new selection: state unchanged, no new visual
  // transition is scheduled.
  h.model.set_attribute(h.container, "src", "https://missing.test/b.jpg");
  h.element.attributes_changed(&mut h.model, &["src"]).unwrap();
  assert!(h.element.wait_network(Duration::from_secs(5)));
  let events = h.element.pump();
  assert!(matches!(
    events.as_slice(),
    [ElementEvent::LoadFailed {
      fallback_entered: false,
      ..
    }]
  ));
  assert_eq!(h.scheduler.pending(), 0);
  assert_eq!(h.element.state(), ElementState::Fallback);
  assert!(h.model.has_class(img, CLASS_GHOST));
  assert_eq!(h.element.diagnostics().loads_failed, 2);
}

#[test]
fn fallback_suppresses_the_placeholder() {
  let mut h = Harness::new(&[
    ("src", "https://missing.test/a.jpg"),
    ("low-res", "ff0000 00ff00 0000ff 000000"),
  ]);

  h.layout_and_settle();
  assert_eq!(h.element.state(), ElementState::Fallback);
  assert!(h.element.placeholder().is_none());

  // A reselection while ghosted builds no new placeholder.
  h.model.set_attribute(h.container, "src", "https://missing.test/b.jpg");
  h.element.attributes_changed(&mut h.model, &["src"]).unwrap();
  assert!(h.element.placeholder().is_none());
}

#[test]
fn nested_fallback_is_forbidden() {
  // The element is itself a fallback: it gets the ghost state but no
  // fallback transition of its own.
  let mut h = Harness::new(&[("src", "https://missing.test/a.jpg"), ("fallback", "")]);

  let events = h.layout_and_settle();
  assert!(matches!(
    events.as_slice(),
    [ElementEvent::LoadFailed {
      fallback_entered: false,
      ..
    }]
  ));
  assert_ne!(h.element.state(), ElementState::Fallback);
  let img = h.element.img_node().unwrap();
  assert!(!h.model.has_class(img, CLASS_GHOST));
}

#[test]
fn success_after_fallback_clears_the_ghost_state() {
  let mut h = Harness::new(&[("src", "https://cdn.test/missing.jpg")]);
  h.fetcher.insert_png("https://cdn.test/good.jpg", 4, 4);

  h.layout_and_settle();
  assert_eq!(h.element.state(), ElementState::Fallback);
  let img = h.element.img_node().unwrap();
  assert!(h.model.has_class(img, CLASS_GHOST));

  h.model.set_attribute(h.container, "src", "https://cdn.test/good.jpg");
  h.element.attributes_changed(&mut h.model, &["src"]).unwrap();
  assert!(h.element.wait_network(Duration::from_secs(5)));
  let events = h.pump_and_flush();

  assert!(matches!(events.as_slice(), [ElementEvent::Loaded { .. }]));
  assert_eq!(h.element.state(), ElementState::Loaded);
  assert!(!h.model.has_class(img, CLASS_GHOST));
}

#[test]
fn stale_completion_never_overwrites_a_newer_one() {
  let mut h = Harness::new(&[("srcset", "https://cdn.test/slow.jpg 320w, https://cdn.test/fast.jpg 640w")]);
  h.fetcher.insert_png("https://cdn.test/slow.jpg", 4, 4);
  h.fetcher.insert_png("https://cdn.test/fast.jpg", 8, 8);
  h.fetcher.block("https://cdn.test/slow.jpg");

  // First selection targets the small candidate, which hangs.
  h.element.layout(&mut h.model).unwrap();
  assert_eq!(h.element.current_url(), Some("https://cdn.test/slow.jpg"));

  // The viewport grows: a newer selection supersedes the hung session
  // without cancelling it.
  h.layout.set_viewport(Size::new(640.0, 900.0));
  h.element.layout(&mut h.model).unwrap();
  assert_eq!(h.element.current_url(), Some("https://cdn.test/fast.jpg"));
  assert_eq!(h.element.pending_sessions(), 2);

  // Only the fast session can finish while the slow fetch is held open;
  // poll until its completion is applied.
  let mut loaded = false;
  for _ in 0..500 {
    let events = h.pump_and_flush();
    if events
      .iter()
      .any(|e| matches!(e, ElementEvent::Loaded { url, .. } if url == "https://cdn.test/fast.jpg"))
    {
      loaded = true;
      break;
    }
    std::thread::sleep(Duration::from_millis(10));
  }
  assert!(loaded, "fast selection never completed");
  let img = h.element.img_node().unwrap();
  assert_eq!(h.model.get_attribute_ref(img, "src"), Some("https://cdn.test/fast.jpg"));

  // The slow fetch finally lands; its completion is discarded.
  h.fetcher.release("https://cdn.test/slow.jpg");
  assert!(h.element.wait_network(Duration::from_secs(5)));
  let events = h.pump_and_flush();
  assert!(events
    .iter()
    .any(|e| matches!(e, ElementEvent::StaleLoadDropped { url, .. } if url == "https://cdn.test/slow.jpg")));
  assert_eq!(h.model.get_attribute_ref(img, "src"), Some("https://cdn.test/fast.jpg"));
  assert_eq!(h.element.diagnostics().stale_completions_dropped, 1);
  assert_eq!(h.element.state(), ElementState::Loaded);
}

#[test]
fn srcset_mutation_takes_precedence_over_src() {
  let mut h = Harness::new(&[("src", "https://cdn.test/old.jpg")]);
  h.fetcher.insert_png("https://cdn.test/old.jpg", 4, 4);
  h.fetcher.insert_png("https://cdn.test/new.jpg", 4, 4);

  h.layout_and_settle();
  assert_eq!(h.element.current_url(), Some("https://cdn.test/old.jpg"));

  // Both attributes mutate in one notification; srcset wins.
  h.model.set_attribute(h.container, "src", "https://cdn.test/ignored.jpg");
  h.model.set_attribute(h.container, "srcset", "https://cdn.test/new.jpg 1x");
  h.element.attributes_changed(&mut h.model, &["src", "srcset"]).unwrap();
  assert_eq!(h.element.current_url(), Some("https://cdn.test/new.jpg"));
}

#[test]
fn undecodable_payload_is_a_load_failure() {
  let mut h = Harness::new(&[("src", "https://cdn.test/corrupt.jpg")]);
  h.fetcher.insert_junk("https://cdn.test/corrupt.jpg");

  let events = h.layout_and_settle();
  assert!(matches!(
    events.as_slice(),
    [ElementEvent::LoadFailed {
      error: respimg::Error::Load(respimg::LoadError::Decode { .. }),
      fallback_entered: true,
    }]
  ));
  assert_eq!(h.element.state(), ElementState::Fallback);
}

#[test]
fn mutations_before_build_do_not_start_loads() {
  let mut h = Harness::new(&[("src", "https://cdn.test/a.jpg")]);
  h.element.attributes_changed(&mut h.model, &["src"]).unwrap();
  assert_eq!(h.element.state(), ElementState::Unbuilt);
  assert_eq!(h.element.pending_sessions(), 0);
}
