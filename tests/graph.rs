#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyflow::{Graph, GraphBuilder, GraphError, VertexRun, VertexStack};

/// Execution counters shared with the test processors.
#[derive(Default)]
struct Runs {
    a: AtomicUsize,
    b: AtomicUsize,
    cond: AtomicUsize,
    c: AtomicUsize,
}

/// The reference graph: `a` and `b` feed `c`, both edges gated on boolean
/// `d` being true. When `with_cond_vertex` is set, `d` is produced by a
/// vertex emitting `d_value` (which may instead fail with `cond_code`);
/// otherwise `d` is left to be preset by the test.
fn gated_sum_graph(
    with_cond_vertex: bool,
    d_value: bool,
    cond_code: i32,
) -> (Graph, Arc<Runs>) {
    let runs = Arc::new(Runs::default());
    let mut builder = GraphBuilder::new();
    {
        let runs = Arc::clone(&runs);
        let mut vertex = builder.vertex("a", move |run: &VertexRun<'_>| {
            runs.a.fetch_add(1, Ordering::Relaxed);
            if run.emit(0, 7i64).is_err() {
                return -1;
            }
            0
        });
        vertex.emit::<i64>("a_out");
    }
    {
        let runs = Arc::clone(&runs);
        let mut vertex = builder.vertex("b", move |run: &VertexRun<'_>| {
            runs.b.fetch_add(1, Ordering::Relaxed);
            if run.emit(0, 9i64).is_err() {
                return -1;
            }
            0
        });
        vertex.emit::<i64>("b_out");
    }
    if with_cond_vertex {
        let runs = Arc::clone(&runs);
        let mut vertex = builder.vertex("cond", move |run: &VertexRun<'_>| {
            runs.cond.fetch_add(1, Ordering::Relaxed);
            if cond_code != 0 {
                return cond_code;
            }
            if run.emit(0, d_value).is_err() {
                return -1;
            }
            0
        });
        vertex.emit::<bool>("d");
    }
    {
        let runs = Arc::clone(&runs);
        let mut vertex = builder.vertex("c", move |run: &VertexRun<'_>| {
            runs.c.fetch_add(1, Ordering::Relaxed);
            let sum = run.as_scalar::<i64>(0) + run.as_scalar::<i64>(1);
            if run.emit(0, sum).is_err() {
                return -1;
            }
            0
        });
        vertex.depend("a_out").condition("d", true);
        vertex.depend("b_out").condition("d", true);
        vertex.emit::<i64>("c_out");
    }
    (builder.build().expect("graph must build"), runs)
}

fn assert_terminal(graph: &Graph, vertex: &str) {
    for dependency in graph.vertex(vertex).unwrap().dependencies() {
        let terminal = dependency.waiting_num();
        assert!(
            terminal == -1 || terminal == 0,
            "edge of {vertex} rests at {terminal}"
        );
    }
}

#[test]
fn established_condition_runs_producers_and_sums() {
    let (mut graph, runs) = gated_sum_graph(true, true, 0);
    graph.run(&["c_out"]).unwrap();

    assert_eq!(graph.closure().finished(), Some(0));
    assert_eq!(graph.data("c_out").unwrap().value::<i64>(), Some(&16));
    assert_eq!(runs.a.load(Ordering::Relaxed), 1);
    assert_eq!(runs.b.load(Ordering::Relaxed), 1);
    assert_eq!(runs.c.load(Ordering::Relaxed), 1);

    let c = graph.vertex("c").unwrap();
    for dependency in c.dependencies() {
        assert!(dependency.ready());
        assert!(dependency.established());
        assert!(!dependency.empty(&graph));
    }
    assert_eq!(c.dependency(0).value::<i64>(&graph), Some(&7));
    assert_eq!(c.dependency(1).value::<i64>(&graph), Some(&9));
    assert_terminal(&graph, "c");

    let mut names = Vec::new();
    assert_eq!(c.dependency(0).activated_vertex_name(&graph, &mut names), 0);
    assert_eq!(names, vec!["a".to_string()]);
}

#[test]
fn unestablished_condition_skips_unreachable_producers() {
    let (mut graph, runs) = gated_sum_graph(true, false, 0);
    graph.run(&["c_out"]).unwrap();

    assert_eq!(graph.closure().finished(), Some(0));
    // The consumer still ran, with both gated edges resolved-not-ready.
    assert_eq!(graph.data("c_out").unwrap().value::<i64>(), Some(&0));
    assert_eq!(runs.c.load(Ordering::Relaxed), 1);
    // Nothing ever asked for a or b.
    assert_eq!(runs.a.load(Ordering::Relaxed), 0);
    assert_eq!(runs.b.load(Ordering::Relaxed), 0);
    assert!(!graph.data("a_out").unwrap().ready());

    let c = graph.vertex("c").unwrap();
    for dependency in c.dependencies() {
        assert!(!dependency.ready());
        assert!(!dependency.established());
        assert_eq!(dependency.value::<i64>(&graph), None);
        assert_eq!(dependency.as_scalar::<i64>(&graph), 0);
    }
    assert_terminal(&graph, "c");

    let mut names = Vec::new();
    assert_eq!(c.dependency(0).activated_vertex_name(&graph, &mut names), -1);
    assert!(names.is_empty());
}

#[test]
fn second_mutable_consumer_is_refused() {
    let mut builder = GraphBuilder::new();
    {
        let mut vertex = builder.vertex("src", |run: &VertexRun<'_>| {
            run.emit(0, 1i64).is_err() as i32
        });
        vertex.emit::<i64>("shared");
    }
    for name in ["c1", "c2"] {
        let mut vertex = builder.vertex(name, |_: &VertexRun<'_>| 0);
        vertex.depend("shared").declare_mutable();
        vertex.emit::<i64>(&format!("{name}_out"));
    }
    let mut graph = builder.build().unwrap();

    let error = graph.run(&["c1_out", "c2_out"]).unwrap_err();
    assert!(matches!(error, GraphError::Failed(-1)), "got {error:?}");
    assert_eq!(graph.closure().finished(), Some(-1));
}

#[test]
fn mutable_and_immutable_consumers_conflict() {
    let mut builder = GraphBuilder::new();
    {
        let mut vertex = builder.vertex("src", |run: &VertexRun<'_>| {
            run.emit(0, 1i64).is_err() as i32
        });
        vertex.emit::<i64>("shared");
    }
    {
        let mut vertex = builder.vertex("reader", |_: &VertexRun<'_>| 0);
        vertex.depend("shared");
        vertex.emit::<i64>("reader_out");
    }
    {
        let mut vertex = builder.vertex("writer", |_: &VertexRun<'_>| 0);
        vertex.depend("shared").declare_mutable();
        vertex.emit::<i64>("writer_out");
    }
    let mut graph = builder.build().unwrap();

    let error = graph.run(&["reader_out", "writer_out"]).unwrap_err();
    assert!(matches!(error, GraphError::Failed(-1)), "got {error:?}");
    assert_eq!(graph.closure().finished(), Some(-1));
}

#[test]
fn failing_condition_producer_short_circuits() {
    let (mut graph, runs) = gated_sum_graph(true, true, -7);
    let error = graph.run(&["c_out"]).unwrap_err();

    assert!(matches!(error, GraphError::Failed(-7)), "got {error:?}");
    assert_eq!(graph.closure().finished(), Some(-7));
    // The gated consumer was never enqueued.
    assert_eq!(runs.c.load(Ordering::Relaxed), 0);
    assert!(!graph.data("c_out").unwrap().ready());
}

#[test]
fn preset_target_resolves_before_activation() {
    let mut builder = GraphBuilder::new();
    {
        let mut vertex = builder.vertex("copy", |run: &VertexRun<'_>| {
            let value = run.as_scalar::<i64>(0);
            run.emit(0, value).is_err() as i32
        });
        vertex.depend("x").declare_type::<i64>();
        vertex.emit::<i64>("copied");
    }
    let mut graph = builder.build().unwrap();
    graph.preset("x", 5i64).unwrap();
    graph.run(&["copied"]).unwrap();

    assert_eq!(graph.data("copied").unwrap().value::<i64>(), Some(&5));
    let edge = graph.vertex("copy").unwrap().dependency(0);
    assert!(edge.ready());
    assert_eq!(edge.waiting_num(), 0);

    // Preset data has no producer vertex to name.
    let mut names = Vec::new();
    assert_eq!(edge.activated_vertex_name(&graph, &mut names), 1);
}

#[test]
fn preset_condition_resolves_before_activation() {
    for (d_value, expected_sum, expected_a_runs) in [(true, 16i64, 1), (false, 0i64, 0)] {
        let (mut graph, runs) = gated_sum_graph(false, false, 0);
        graph.preset("d", d_value).unwrap();
        graph.run(&["c_out"]).unwrap();

        assert_eq!(
            graph.data("c_out").unwrap().value::<i64>(),
            Some(&expected_sum)
        );
        assert_eq!(runs.a.load(Ordering::Relaxed), expected_a_runs);
        assert_eq!(runs.c.load(Ordering::Relaxed), 1);
        assert_terminal(&graph, "c");
    }
}

#[test]
fn non_essential_edge_does_not_block() {
    let mut builder = GraphBuilder::new();
    {
        let mut vertex = builder.vertex("c", |run: &VertexRun<'_>| {
            // The optional input never resolves; its accessors stay empty.
            assert_eq!(run.value::<i64>(0), None);
            run.emit(0, 1i64).is_err() as i32
        });
        vertex.depend("opt").declare_essential(false);
        vertex.emit::<i64>("c_out");
    }
    let mut graph = builder.build().unwrap();
    graph.run(&["c_out"]).unwrap();

    assert_eq!(graph.data("c_out").unwrap().value::<i64>(), Some(&1));
    let edge = graph.vertex("c").unwrap().dependency(0);
    assert!(!edge.is_essential());
    assert!(!edge.ready());
}

#[test]
fn mutable_edge_mutates_target_in_place() {
    let mut builder = GraphBuilder::new();
    {
        let mut vertex = builder.vertex("src", |run: &VertexRun<'_>| {
            run.emit(0, 10i64).is_err() as i32
        });
        vertex.emit::<i64>("value");
    }
    {
        let mut vertex = builder.vertex("doubler", |run: &VertexRun<'_>| {
            let doubled = {
                let mut value = run.mutable_value::<i64>(0).expect("mutable view");
                *value *= 2;
                *value
            };
            run.emit(0, doubled).is_err() as i32
        });
        vertex.depend("value").declare_mutable();
        vertex.emit::<i64>("doubled");
    }
    let mut graph = builder.build().unwrap();
    graph.run(&["doubled"]).unwrap();

    assert_eq!(graph.data("doubled").unwrap().value::<i64>(), Some(&20));
    // The mutation happened in the shared slot itself.
    assert_eq!(graph.data("value").unwrap().value::<i64>(), Some(&20));
}

#[test]
fn typed_accessors_refuse_wrong_types() {
    let mut builder = GraphBuilder::new();
    {
        let mut vertex = builder.vertex("src", |run: &VertexRun<'_>| {
            run.emit(0, 7i64).is_err() as i32
        });
        vertex.emit::<i64>("typed");
    }
    {
        let mut vertex = builder.vertex("c", |run: &VertexRun<'_>| {
            assert_eq!(run.value::<String>(0), None);
            assert_eq!(run.value::<i64>(0), Some(&7));
            0
        });
        vertex.depend("typed");
        vertex.emit::<i64>("c_out");
    }
    let mut graph = builder.build().unwrap();
    graph.run(&["c_out"]).unwrap();
}

#[test]
fn conflicting_type_declarations_fail_to_build() {
    let mut builder = GraphBuilder::new();
    {
        let mut vertex = builder.vertex("src1", |_: &VertexRun<'_>| 0);
        vertex.emit::<i64>("slot");
    }
    {
        let mut vertex = builder.vertex("src2", |_: &VertexRun<'_>| 0);
        vertex.emit::<String>("slot");
    }
    let error = builder.build().unwrap_err();
    assert!(matches!(error, GraphError::TypeMismatch { .. }), "got {error:?}");
}

#[test]
fn preset_type_mismatch_is_refused() {
    let mut builder = GraphBuilder::new();
    {
        let mut vertex = builder.vertex("c", |_: &VertexRun<'_>| 0);
        vertex.depend("x").declare_type::<i64>();
        vertex.emit::<i64>("c_out");
    }
    let mut graph = builder.build().unwrap();
    let error = graph.preset("x", "oops".to_string()).unwrap_err();
    assert!(matches!(error, GraphError::TypeMismatch { .. }), "got {error:?}");
}

#[test]
fn ready_data_may_stay_empty() {
    let mut builder = GraphBuilder::new();
    {
        // Declares an output and publishes nothing into it.
        let mut vertex = builder.vertex("silent", |_: &VertexRun<'_>| 0);
        vertex.emit::<i64>("maybe");
    }
    {
        let mut vertex = builder.vertex("c", |run: &VertexRun<'_>| {
            assert_eq!(run.value::<i64>(0), None);
            assert_eq!(run.as_scalar::<i64>(0), 0);
            run.emit(0, 1i64).is_err() as i32
        });
        vertex.depend("maybe");
        vertex.emit::<i64>("c_out");
    }
    let mut graph = builder.build().unwrap();
    graph.run(&["c_out"]).unwrap();

    let maybe = graph.data("maybe").unwrap();
    assert!(maybe.ready());
    assert!(maybe.empty());
    let edge = graph.vertex("c").unwrap().dependency(0);
    assert!(edge.ready());
    assert!(edge.empty(&graph));
}

#[test]
fn externally_published_empty_slot_resolves_consumers() {
    let mut builder = GraphBuilder::new();
    {
        let mut vertex = builder.vertex("c", |run: &VertexRun<'_>| {
            assert_eq!(run.value::<i64>(0), None);
            run.emit(0, 1i64).is_err() as i32
        });
        vertex.depend("x");
        vertex.emit::<i64>("c_out");
    }
    let mut graph = builder.build().unwrap();
    let runnable = VertexStack::new();
    graph
        .data("x")
        .unwrap()
        .publish_empty(&graph, &runnable)
        .unwrap();
    graph.run(&["c_out"]).unwrap();

    let x = graph.data("x").unwrap();
    assert!(x.ready());
    assert!(x.empty());
    assert_eq!(graph.data("c_out").unwrap().value::<i64>(), Some(&1));
}

#[test]
fn reset_replays_to_the_same_terminal_state() {
    let (mut graph, runs) = gated_sum_graph(false, false, 0);
    for round in 1..=3 {
        graph.reset();
        graph.preset("d", true).unwrap();
        graph.run(&["c_out"]).unwrap();
        assert_eq!(graph.data("c_out").unwrap().value::<i64>(), Some(&16));
        assert_eq!(runs.c.load(Ordering::Relaxed), round);
        assert_terminal(&graph, "c");
    }

    // Flipping the condition flips the outcome, from the same built graph.
    graph.reset();
    graph.preset("d", false).unwrap();
    graph.run(&["c_out"]).unwrap();
    assert_eq!(graph.data("c_out").unwrap().value::<i64>(), Some(&0));
    assert_terminal(&graph, "c");
}

#[test]
fn unknown_output_is_reported() {
    let (mut graph, _) = gated_sum_graph(true, true, 0);
    let error = graph.run(&["nope"]).unwrap_err();
    assert!(matches!(error, GraphError::UnknownData(name) if name == "nope"));
}

#[test]
fn double_preset_is_refused() {
    let (mut graph, _) = gated_sum_graph(false, false, 0);
    graph.preset("d", true).unwrap();
    let error = graph.preset("d", true).unwrap_err();
    assert!(matches!(error, GraphError::AlreadyPublished(name) if name == "d"));
}

#[test]
fn requesting_an_unproducible_output_fails() {
    let mut builder = GraphBuilder::new();
    {
        let mut vertex = builder.vertex("c", |_: &VertexRun<'_>| 0);
        vertex.depend("void");
        vertex.emit::<i64>("c_out");
    }
    let mut graph = builder.build().unwrap();
    // "void" has no producer and was not preset, so "c_out" cannot appear.
    let error = graph.run(&["c_out"]).unwrap_err();
    assert!(matches!(error, GraphError::Unfinished(name) if name == "c_out"));
}

#[test]
fn wide_fan_in_completes_in_parallel() {
    const WIDTH: usize = 32;
    let mut builder = GraphBuilder::new();
    for i in 0..WIDTH {
        let mut vertex = builder.vertex(&format!("p{i}"), move |run: &VertexRun<'_>| {
            run.emit(0, i as i64).is_err() as i32
        });
        vertex.emit::<i64>(&format!("out{i}"));
    }
    {
        let mut vertex = builder.vertex("collect", |run: &VertexRun<'_>| {
            let sum: i64 = (0..WIDTH).map(|i| run.as_scalar::<i64>(i)).sum();
            run.emit(0, sum).is_err() as i32
        });
        for i in 0..WIDTH {
            vertex.depend(&format!("out{i}"));
        }
        vertex.emit::<i64>("total");
    }
    let mut graph = builder.build().unwrap();
    graph.run(&["total"]).unwrap();

    let expected: i64 = (0..WIDTH as i64).sum();
    assert_eq!(graph.data("total").unwrap().value::<i64>(), Some(&expected));
    assert_terminal(&graph, "collect");
}

#[test]
fn shared_immutable_readers_coexist() {
    let mut builder = GraphBuilder::new();
    {
        let mut vertex = builder.vertex("src", |run: &VertexRun<'_>| {
            run.emit(0, 100i64).is_err() as i32
        });
        vertex.emit::<i64>("base");
    }
    for (name, offset) in [("left", 1i64), ("right", 2i64)] {
        let mut vertex = builder.vertex(name, move |run: &VertexRun<'_>| {
            let value = run.as_scalar::<i64>(0) + offset;
            run.emit(0, value).is_err() as i32
        });
        vertex.depend("base");
        vertex.emit::<i64>(&format!("{name}_out"));
    }
    {
        let mut vertex = builder.vertex("join", |run: &VertexRun<'_>| {
            let sum = run.as_scalar::<i64>(0) + run.as_scalar::<i64>(1);
            run.emit(0, sum).is_err() as i32
        });
        vertex.depend("left_out");
        vertex.depend("right_out");
        vertex.emit::<i64>("joined");
    }
    let mut graph = builder.build().unwrap();
    graph.run(&["joined"]).unwrap();
    assert_eq!(graph.data("joined").unwrap().value::<i64>(), Some(&203));
}
