//! Offline walkthrough of both games using scripted model responses

use logprob_lab::{
    CandidateSelector, GuessingGame, ModelResponse, ScriptedModel, SteeringSession,
    TargetProbabilityEstimator, TokenLogprob, TopLogprob,
};

fn next_token(chosen: &str, alts: &[(&str, f64)]) -> ModelResponse {
    ModelResponse::with_logprobs(
        chosen,
        vec![TokenLogprob {
            token: chosen.to_string(),
            logprob: alts[0].1,
            top_logprobs: alts.iter().map(|&(t, lp)| TopLogprob::new(t, lp)).collect(),
        }],
    )
}

fn continuation(token: &str, p: f64) -> ModelResponse {
    ModelResponse::with_logprobs(
        token,
        vec![TokenLogprob {
            token: token.to_string(),
            logprob: p.ln(),
            top_logprobs: Vec::new(),
        }],
    )
}

fn main() {
    println!("=== Mode 1: guessing ===\n");

    let mut model = ScriptedModel::new();
    model.push(next_token(
        " and",
        &[
            (" and", -0.1),
            ("and", -0.1),
            (" but", -2.0),
            (" slowly", -3.5),
            (" quietly", -5.0),
        ],
    ));
    let mut game = GuessingGame::new(model, CandidateSelector::seeded(1), "The door creaked open");

    match game.next_round() {
        Ok(round) => {
            println!("{}", game.text());
            for (rank, text, percent, chosen) in round.distribution.probability_table(10) {
                let marker = if chosen { " *" } else { "" };
                println!("  {rank:>2}. {text:<10} {percent:>6.2}%{marker}");
            }
            println!("Options: {:?}", round.options.labels());
            match game.submit_guess(&round, "but") {
                Ok(outcome) => println!("Guessed \"but\": correct = {}", outcome.correct),
                Err(e) => println!("Guess rejected: {e}"),
            }
            println!("Text now: {}\n", game.text());
        }
        Err(e) => println!("Round failed: {e}\n"),
    }

    println!("=== Mode 2: steering toward \"accident\" ===\n");

    let mut model = ScriptedModel::new();
    let script = [(" road", 0.02, "5"), (" skid", 0.08, "25"), (" crash", 0.3, "70")];
    for (token, p, estimate) in script {
        model.push(continuation(token, p));
        model.push(ModelResponse::text(estimate));
    }
    let mut estimator = TargetProbabilityEstimator::new(model);
    let mut session = SteeringSession::new();
    if let Err(e) = session.start("accident", 5, "The car sped along the wet road.") {
        println!("Could not start: {e}");
        return;
    }

    for nudge in ["the driver was tired", "ice on the bend", "brakes suddenly failed"] {
        match session.submit_nudge(nudge, &mut estimator) {
            Ok(outcome) => println!(
                "{:<24} {:>5.1}% ({:+.1}) {}",
                nudge,
                outcome.probability,
                outcome.delta,
                outcome.feedback.message()
            ),
            Err(e) => println!("{nudge:<24} failed: {e}"),
        }
    }

    let summary = session.summary();
    println!("\nHistory: {:?}", summary.probability_history);
    println!("Peak:    {:.1}%", summary.peak_probability);
}
