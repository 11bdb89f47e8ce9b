use std::io;
use std::io::Write;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ccgbender::persist;
use ccgbender::{
  AcceptAll, ChartParser, Config, Dataset, Err, Grammar, Lexicon, LinearScorer, PackingMode, ShiftReduceParser,
  Trainer, tokenize,
};

#[derive(Parser)]
#[command(name = "ccgbender-cli", about = "Parse sentences with a CCG lexicon, or train its weights")]
struct Cli {
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Read sentences from stdin and print their derivations
  Parse {
    #[command(flatten)]
    common: CommonArgs,
    /// Use the exhaustive chart parser instead of beam search
    #[arg(short, long)]
    chart: bool,
    /// Print the whole chart (with --chart)
    #[arg(long)]
    print_chart: bool,
    /// Override the configured beam width
    #[arg(short, long)]
    beam: Option<usize>,
    /// Weights saved by `train`
    #[arg(short, long)]
    weights: Option<PathBuf>,
  },
  /// Train weights on a `tokens<TAB>term` dataset
  Train {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(short, long)]
    data: PathBuf,
    /// Where to write the learned weights
    #[arg(short, long)]
    weights: Option<PathBuf>,
    /// Load and save oracle filters here
    #[arg(long)]
    filters: Option<PathBuf>,
    /// Load and save gold derivations here
    #[arg(long)]
    gold: Option<PathBuf>,
  },
}

#[derive(Args)]
struct CommonArgs {
  /// TOML config; defaults apply when absent
  #[arg(long)]
  config: Option<PathBuf>,
  #[arg(short, long)]
  lexicon: PathBuf,
}

impl CommonArgs {
  fn load(&self) -> Result<(Config, Grammar, Lexicon), Err> {
    let config = match &self.config {
      Some(path) => Config::from_path(path)?,
      None => Config::default(),
    };
    let grammar = Grammar::from_config(&config)?;
    let lexicon = Lexicon::read_from_file(&self.lexicon, &grammar.types)?;
    info!(entries = lexicon.len(), rules = grammar.rules.len(), "loaded grammar");
    Ok((config, grammar, lexicon))
  }
}

fn parse(
  g: &Grammar,
  lexicon: &Lexicon,
  scorer: &LinearScorer,
  config: &Config,
  sentence: &str,
  use_chart: bool,
  print_chart: bool,
) {
  let tokens = tokenize(sentence);
  let mode = config.parser.packing;

  if use_chart {
    let chart = ChartParser::new(g)
      .with_pruning(config.parser.cells_per_span)
      .parse(&tokens, lexicon, scorer, &mut AcceptAll, mode);
    if print_chart {
      println!("chart:\n{}\n", chart);
    }

    let derivations = chart.derivations();
    println!(
      "Parsed {} categor{}",
      derivations.len(),
      if derivations.len() == 1 { "y" } else { "ies" }
    );
    for &group in derivations {
      let best = chart.group(group);
      println!("{} ({}, {} parses)", best.category, best.best_score, chart.num_parses(group));
      if let Some(tree) = chart.best_tree(group) {
        println!("{}", tree);
      }
      println!();
    }
  } else {
    let parse = ShiftReduceParser::new(g, config.parser.beam_width).parse(&tokens, lexicon, scorer, &mut AcceptAll, mode);
    let derivations = parse.derivations();
    println!(
      "Parsed {} categor{}",
      derivations.len(),
      if derivations.len() == 1 { "y" } else { "ies" }
    );
    for d in derivations {
      println!("{} ({}, {} parses)", d.category, d.score, d.num_parses);
      if let Some(tree) = parse.tree(&g.rules, d.states[0]) {
        println!("{}", tree);
      }
      println!();
    }
  }
}

fn main() -> Result<(), Err> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(io::stderr)
    .init();

  match Cli::parse().command {
    Command::Parse {
      common,
      chart,
      print_chart,
      beam,
      weights,
    } => {
      let (mut config, g, lexicon) = common.load()?;
      if let Some(beam) = beam {
        config.parser.beam_width = beam.max(1);
      }
      let discipline = config.trainer.discipline;
      let scorer = match weights {
        Some(path) => LinearScorer::with_weights(persist::load_weights(&path, discipline)?, config.parser.skip_penalty),
        None => LinearScorer::new(discipline, config.parser.skip_penalty),
      };

      let mut input = String::new();
      loop {
        print!("> ");
        io::stdout().flush()?;

        match io::stdin().read_line(&mut input) {
          Ok(_) => {
            if input.is_empty() {
              // ctrl+d
              return Ok(());
            }
            input.make_ascii_lowercase();
            parse(&g, &lexicon, &scorer, &config, input.trim(), chart, print_chart);
            input.clear();
          }
          Err(error) => return Err(error.into()),
        }
      }
    }
    Command::Train {
      common,
      data,
      weights,
      filters,
      gold,
    } => {
      let (config, g, lexicon) = common.load()?;
      let dataset = Dataset::read_from_file(&data, &g.types)?;
      let scorer = LinearScorer::new(config.trainer.discipline, config.parser.skip_penalty);

      let mut trainer = Trainer::new(&g, &lexicon, &scorer, config.parser.clone(), config.trainer.clone());
      if let Some(path) = filters.as_ref().filter(|p| p.exists()) {
        trainer = trainer.with_filters(persist::load_filters(path)?);
      }
      if let Some(path) = gold.as_ref().filter(|p| p.exists()) {
        trainer = trainer.with_gold_cache(persist::load_gold_cache(path)?);
      }

      for stats in trainer.train(&dataset)? {
        println!("{}", stats);
      }

      if let Some(path) = filters {
        persist::save_filters(&path, trainer.filters())?;
      }
      if let Some(path) = gold {
        persist::save_gold_cache(&path, trainer.gold_cache())?;
      }
      if let Some(path) = weights {
        persist::save_weights(&path, scorer.weights())?;
      }
      Ok(())
    }
  }
}
