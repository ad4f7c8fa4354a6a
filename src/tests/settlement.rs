use super::*;

fn split_source(entries: &[(&str, Vec<(i64, f64)>)]) -> InMemoryCorporateActions {
    entries
        .iter()
        .fold(InMemoryCorporateActions::new(), |source, (instrument, actions)| {
            source.with_series(
                *instrument,
                actions
                    .iter()
                    .map(|&(ts, factor)| CorporateAction::new(ts, factor)),
            )
        })
}

fn history_closes(calc: &Calculator, instrument: &str) -> Vec<String> {
    calc.instrument(instrument)
        .expect("instrument is configured")
        .history()
        .iter()
        .map(|(_, raw)| raw.val(FIELD_CLOSE).to_string())
        .collect()
}

#[test]
fn replay_scales_price_linear_indicators_by_factor() {
    let registry = FormulaRegistry::with_builtins();
    let mut graph = InstrumentGraph::new("x", graph_for(&price_definitions()), &registry)
        .expect("graph should materialize");
    for (ts, close) in [(1, 10.0), (2, 20.0), (3, 30.0)] {
        graph
            .process_tick(ts, &close_row(close))
            .expect("tick should succeed");
    }
    let ema = value(graph.row(), "EmaPx");
    let ma = value(graph.row(), "MaPx");
    assert!(approx_eq(ema, 21.25));
    assert!(approx_eq(ma, 25.0));

    let replayed = graph.settle(CorporateAction::new(4, 0.5));
    assert_eq!(replayed, 3);
    assert!(approx_eq(value(graph.row(), "EmaPx"), 0.5 * ema));
    assert!(approx_eq(value(graph.row(), "MaPx"), 0.5 * ma));
    assert_eq!(graph.row().ts, 3);
    let closes: Vec<&str> = graph
        .history()
        .iter()
        .map(|(_, raw)| raw.val(FIELD_CLOSE))
        .collect();
    assert_eq!(closes, vec!["5", "10", "15"]);
}

#[test]
fn settled_stream_matches_a_stream_that_was_always_adjusted() {
    let mut calc = settled_calculator(
        &["x"],
        price_definitions(),
        split_source(&[("x", vec![(4, 0.5)])]),
    );
    let mut adjusted = calculator(&["x"], price_definitions());
    assert_eq!(calc.pending_settlements(), 1);

    for (ts, close) in [(1, 10.0), (2, 20.0), (3, 30.0)] {
        calc.calculate(ts, &batch(&[("x", close)]))
            .expect("calculate should succeed");
        adjusted
            .calculate(ts, &batch(&[("x", close * 0.5)]))
            .expect("calculate should succeed");
    }
    let got = calc
        .calculate(4, &batch(&[("x", 20.0)]))
        .expect("calculate should succeed");
    let want = adjusted
        .calculate(4, &batch(&[("x", 20.0)]))
        .expect("calculate should succeed");
    assert_eq!(got, want);
    assert_eq!(calc.pending_settlements(), 0);
    assert_eq!(history_closes(&calc, "x"), vec!["5", "10", "15", "20"]);
}

#[test]
fn co_dated_actions_settle_every_instrument_before_the_batch() {
    let mut calc = settled_calculator(
        &["x", "y"],
        price_definitions(),
        split_source(&[("x", vec![(3, 2.0)]), ("y", vec![(3, 2.0)])]),
    );
    calc.calculate(1, &batch(&[("x", 10.0), ("y", 30.0)]))
        .expect("calculate should succeed");
    let out = calc
        .calculate(3, &batch(&[("x", 20.0)]))
        .expect("calculate should succeed");

    assert_eq!(history_closes(&calc, "x"), vec!["20", "20"]);
    assert_eq!(history_closes(&calc, "y"), vec!["60"]);
    assert!(approx_eq(value(&out[0].1, "MaPx"), 20.0));
    let y = calc.instrument("y").expect("y");
    assert!(approx_eq(value(y.row(), "EmaPx"), 30.0));
    assert_eq!(calc.pending_settlements(), 0);
}

#[test]
fn several_due_actions_apply_in_order_on_the_next_tick() {
    let mut calc = settled_calculator(
        &["x"],
        price_definitions(),
        split_source(&[("x", vec![(3, 0.5), (2, 2.0)])]),
    );
    calc.calculate(1, &batch(&[("x", 10.0)]))
        .expect("calculate should succeed");
    calc.calculate(5, &batch(&[("x", 12.0)]))
        .expect("calculate should succeed");
    assert_eq!(history_closes(&calc, "x"), vec!["10", "12"]);
    assert_eq!(calc.pending_settlements(), 0);
}

#[test]
fn missing_corporate_action_data_degrades_to_no_adjustment() {
    let mut calc = settled_calculator(
        &["x", "y"],
        price_definitions(),
        split_source(&[("x", vec![(2, 2.0)])]),
    );
    assert_eq!(calc.pending_settlements(), 1);
    calc.calculate(1, &batch(&[("x", 10.0), ("y", 10.0)]))
        .expect("calculate should succeed");
    calc.calculate(2, &batch(&[("x", 20.0), ("y", 10.0)]))
        .expect("calculate should succeed");
    assert_eq!(history_closes(&calc, "x"), vec!["20", "20"]);
    assert_eq!(history_closes(&calc, "y"), vec!["10", "10"]);

    let config =
        CalculatorConfig::new(["x"], price_definitions()).with_settlement(true);
    let mut sourceless = Calculator::initialize(&config, &FormulaRegistry::with_builtins(), None)
        .expect("a missing source is not fatal");
    sourceless
        .calculate(1, &batch(&[("x", 10.0)]))
        .expect("calculate should succeed");
    assert_eq!(sourceless.pending_settlements(), 0);
}

#[test]
fn reload_picks_up_new_actions_without_reapplying_old_ones() {
    let source = SharedSource::default();
    let handle = source.inner.clone();
    let mut calc = settled_calculator(&["x"], price_definitions(), source);
    calc.calculate(1, &batch(&[("x", 10.0)]))
        .expect("calculate should succeed");
    assert_eq!(calc.pending_settlements(), 0);

    handle
        .lock()
        .expect("source lock")
        .stage("x", [CorporateAction::new(2, 2.0)]);
    calc.calculate(2, &batch(&[("x", 20.0)]))
        .expect("calculate should succeed");
    assert_eq!(history_closes(&calc, "x"), vec!["20", "20"]);

    handle.lock().expect("source lock").stage(
        "x",
        [CorporateAction::new(2, 2.0), CorporateAction::new(4, 0.5)],
    );
    calc.calculate(3, &batch(&[("x", 30.0)]))
        .expect("calculate should succeed");
    assert_eq!(history_closes(&calc, "x"), vec!["20", "20", "30"]);
    assert_eq!(calc.pending_settlements(), 1);

    calc.calculate(4, &batch(&[("x", 15.0)]))
        .expect("calculate should succeed");
    assert_eq!(history_closes(&calc, "x"), vec!["10", "10", "15", "15"]);
    assert_eq!(calc.pending_settlements(), 0);
}

#[test]
fn failed_reload_is_reported() {
    let source = SharedSource {
        fail_reload: true,
        ..SharedSource::default()
    };
    source
        .inner
        .lock()
        .expect("source lock")
        .stage("x", [CorporateAction::new(1, 2.0)]);
    let mut calc = settled_calculator(&["x"], price_definitions(), source);
    let err = calc
        .calculate(1, &batch(&[("x", 10.0)]))
        .expect_err("reload failure surfaces");
    assert!(matches!(
        err,
        EngineError::Settlement(SettlementError::Reload { .. })
    ));
}

#[test]
fn action_reloaded_after_its_effective_date_rescales_only_earlier_rows() {
    let source = SharedSource::default();
    let handle = source.inner.clone();
    let mut calc = settled_calculator(&["x"], price_definitions(), source);
    // the ts=2 and ts=3 quotes already arrive in the post-split basis
    for (ts, close) in [(1, 10.0), (2, 5.0), (3, 6.0)] {
        calc.calculate(ts, &batch(&[("x", close)]))
            .expect("calculate should succeed");
    }

    handle
        .lock()
        .expect("source lock")
        .stage("x", [CorporateAction::new(2, 0.5)]);
    let got = calc
        .calculate(4, &batch(&[("x", 7.0)]))
        .expect("calculate should succeed");
    assert_eq!(history_closes(&calc, "x"), vec!["5", "5", "6", "7"]);
    assert_eq!(calc.pending_settlements(), 0);

    let mut adjusted = calculator(&["x"], price_definitions());
    let mut want = Vec::new();
    for (ts, close) in [(1, 5.0), (2, 5.0), (3, 6.0), (4, 7.0)] {
        want = adjusted
            .calculate(ts, &batch(&[("x", close)]))
            .expect("calculate should succeed");
    }
    assert_eq!(got, want);
}
