//! logprob-lab CLI
//!
//! Command-line front end for the guessing and steering games.

use clap::{Parser, Subcommand};
use logprob_lab::{
    is_valid_word, CandidateSelector, LabConfig, ModelResponse, TokenDistribution,
};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "logprob-lab")]
#[command(version = "1.0.0")]
#[command(about = "Next-token guessing and target-steering games over model log-probabilities")]
#[command(long_about = r#"
logprob-lab: see how a language model picks its next word

Mode 1 (guess):  the model's top-k candidates become four options; pick the
                 one the model actually chose.
Mode 2 (steer):  append short nudges to a story and push the model toward a
                 target concept within a limited number of turns.
"#)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Model name for live games
    #[arg(long, global = true, default_value = "gpt-4o-mini")]
    model: String,

    /// OpenAI-compatible endpoint for live games
    #[arg(long, global = true, default_value = "https://api.openai.com")]
    base_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize a recorded model response (JSON)
    Normalize {
        /// Response file with `text` and `token_logprobs`
        input: PathBuf,

        /// Also draw four answer options
        #[arg(long)]
        options: bool,

        /// Seed for option selection
        #[arg(long)]
        seed: Option<u64>,

        /// Rows to show in the probability table
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Check tokens against the word-validity heuristic
    Word {
        /// Tokens to check
        #[arg(required = true)]
        tokens: Vec<String>,
    },

    /// Print the effective configuration
    Config,

    /// Play the next-token guessing game (needs OPENAI_API_KEY)
    Guess {
        /// Starting text (default: a random opening line)
        #[arg(long)]
        context: Option<String>,

        /// Number of rounds
        #[arg(short, long, default_value = "5")]
        rounds: u32,
    },

    /// Play the target-steering game (needs OPENAI_API_KEY)
    Steer {
        /// Target concept (default: random)
        #[arg(short, long)]
        target: Option<String>,

        /// Turn limit (default: from config)
        #[arg(long)]
        turns: Option<u32>,

        /// Starting story (default: a random opening line)
        #[arg(long)]
        context: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => LabConfig::load(path)?,
        None => LabConfig::default(),
    };

    match cli.command {
        Commands::Normalize {
            input,
            options,
            seed,
            limit,
        } => {
            normalize_file(&input, &config, options, seed, limit)?;
        }
        Commands::Word { tokens } => {
            for token in &tokens {
                let verdict = if is_valid_word(token) { "word" } else { "fragment" };
                println!("{:<20} {}", format!("{token:?}"), verdict);
            }
        }
        Commands::Config => {
            println!("{}", config.to_json_pretty()?);
        }
        Commands::Guess { context, rounds } => {
            live::guess(&cli.model, &cli.base_url, &config, context, rounds)?;
        }
        Commands::Steer {
            target,
            turns,
            context,
        } => {
            live::steer(&cli.model, &cli.base_url, &config, target, turns, context)?;
        }
    }

    Ok(())
}

fn normalize_file(
    input: &PathBuf,
    config: &LabConfig,
    options: bool,
    seed: Option<u64>,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let content = fs::read_to_string(input)?;
    let response: ModelResponse = serde_json::from_str(&content)?;
    let dist = TokenDistribution::from_response(&response)?;

    println!("Next-token distribution: {}", input.display());
    println!("========================");
    println!("{:>4}  {:<20} {:>8}", "Rank", "Token", "Prob");
    for (rank, text, percent, chosen) in dist.probability_table(limit) {
        let marker = if chosen { " <- chosen" } else { "" };
        println!("{:>4}  {:<20} {:>7.2}%{}", rank, format!("{text:?}"), percent, marker);
    }
    println!();
    println!("Candidates: {}", dist.len());
    println!("Covered:    {:.1}%", dist.total_probability() * 100.0);

    if options {
        let mut selector = match seed {
            Some(s) => CandidateSelector::seeded(s),
            None => CandidateSelector::new(),
        };
        selector.set_bands(config.bands);
        let round = selector.select(&dist)?;
        println!();
        println!("Options:");
        for (i, option) in round.options().iter().enumerate() {
            println!("  {}. {} (rank {})", i + 1, option.text, option.rank);
        }
    }

    Ok(())
}

#[cfg(feature = "openai")]
mod live {
    use logprob_lab::{
        analyze_session, continue_story, targets::random_opening, CandidateSelector, FeedbackClass,
        GuessingGame, LabConfig, LabError, OpenAiClient, SessionState, SteeringSession,
        TargetConcept, TargetProbabilityEstimator,
    };
    use std::io::{self, BufRead, Write};

    fn client(model: &str, base_url: &str) -> Result<OpenAiClient, Box<dyn std::error::Error>> {
        let key = std::env::var("OPENAI_API_KEY").map_err(|_| "OPENAI_API_KEY is not set")?;
        Ok(OpenAiClient::with_endpoint(key, model, base_url)?)
    }

    fn prompt(label: &str) -> io::Result<Option<String>> {
        print!("{label}");
        io::stdout().flush()?;
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    pub fn guess(
        model: &str,
        base_url: &str,
        config: &LabConfig,
        context: Option<String>,
        rounds: u32,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut selector = CandidateSelector::new();
        selector.set_bands(config.bands);
        let start = context.unwrap_or_else(|| random_opening(&mut rand::thread_rng()).to_string());
        let mut game =
            GuessingGame::with_config(client(model, base_url)?, selector, &start, config.guessing);

        for _ in 0..rounds {
            println!();
            println!("{}", game.text());
            let round = match game.next_round() {
                Ok(round) => round,
                Err(e @ LabError::RateLimited { .. }) => {
                    eprintln!("{e}. Wait a moment and try again.");
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            for (i, option) in round.options.options().iter().enumerate() {
                println!("  {}. {}", i + 1, option.text);
            }
            let Some(answer) = prompt("Your guess (1-4): ")? else {
                break;
            };
            let guess = answer
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| round.options.options().get(i))
                .map(|c| c.text.clone())
                .unwrap_or(answer);

            let outcome = game.submit_guess(&round, &guess)?;
            if outcome.correct {
                println!("Correct! ({:.1}%)", outcome.chosen.percent());
            } else {
                println!(
                    "The model chose {:?} ({:.1}%)",
                    outcome.chosen.text,
                    outcome.chosen.percent()
                );
            }
            for (rank, text, percent, _) in round.distribution.probability_table(5) {
                println!("    {rank:>2}. {text:<16} {percent:>6.2}%");
            }
        }

        let score = game.score();
        println!();
        println!(
            "Score: {}/{} (best streak {})",
            score.correct, score.rounds, score.best_streak
        );
        Ok(())
    }

    pub fn steer(
        model: &str,
        base_url: &str,
        config: &LabConfig,
        target: Option<String>,
        turns: Option<u32>,
        context: Option<String>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut rng = rand::thread_rng();
        let target = match target {
            Some(t) => TargetConcept::new(&t),
            None => TargetConcept::random(&mut rng),
        };
        let opening = context.unwrap_or_else(|| random_opening(&mut rng).to_string());

        let mut estimator =
            TargetProbabilityEstimator::with_config(client(model, base_url)?, config.estimator);
        let mut session = SteeringSession::with_config(config.session);
        session.start(&target.word, turns.unwrap_or(config.session.max_turns), &opening)?;

        println!("Target: {}", target.word);
        println!(
            "Up to {} words per nudge. /preview shows a continuation, /giveup ends.",
            session.max_nudge_words()
        );

        while session.state() == SessionState::InProgress {
            println!();
            println!("{}", session.context());
            let label = format!("[turn {}/{}] nudge: ", session.turn() + 1, session.max_turns());
            let Some(line) = prompt(&label)? else {
                session.give_up()?;
                break;
            };

            match line.as_str() {
                "/giveup" => session.give_up()?,
                "/preview" => match continue_story(estimator.model_mut(), session.context(), 40) {
                    Ok(text) => println!("  ...{text}"),
                    Err(e) => eprintln!("Preview failed: {e}"),
                },
                nudge => match session.submit_nudge(nudge, &mut estimator) {
                    Ok(outcome) => {
                        let bar = "#".repeat((outcome.probability / 5.0).round() as usize);
                        println!(
                            "  {:>5.1}% [{:<20}] {}",
                            outcome.probability,
                            bar,
                            outcome.feedback.message()
                        );
                        if outcome.feedback == FeedbackClass::Neutral {
                            println!("  Try a more concrete word.");
                        }
                    }
                    Err(e @ (LabError::EmptyNudge | LabError::NudgeTooLong { .. })) => {
                        eprintln!("  {e}");
                    }
                    Err(e) if e.is_retryable() => {
                        eprintln!("  {e}. Your turn was not used; try again.");
                    }
                    Err(e) => return Err(e.into()),
                },
            }
        }

        let summary = session.summary();
        println!();
        match summary.state {
            SessionState::Won => println!(
                "You steered the story to \"{}\" in {} turns!",
                summary.hidden_target, summary.turns_used
            ),
            _ => println!("Game over. Peak probability {:.1}%.", summary.peak_probability),
        }
        match analyze_session(estimator.model_mut(), &summary) {
            Ok(text) => println!("\n{text}"),
            Err(e) => eprintln!("Analysis unavailable: {e}"),
        }
        Ok(())
    }
}

#[cfg(not(feature = "openai"))]
mod live {
    use logprob_lab::LabConfig;

    const MISSING: &str = "live games need the `openai` feature (cargo run --features openai)";

    pub fn guess(
        _model: &str,
        _base_url: &str,
        _config: &LabConfig,
        _context: Option<String>,
        _rounds: u32,
    ) -> Result<(), Box<dyn std::error::Error>> {
        Err(MISSING.into())
    }

    pub fn steer(
        _model: &str,
        _base_url: &str,
        _config: &LabConfig,
        _target: Option<String>,
        _turns: Option<u32>,
        _context: Option<String>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        Err(MISSING.into())
    }
}
