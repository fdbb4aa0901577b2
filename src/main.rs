use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mixwheel::harmonic::{self, HarmonicPosition};
use mixwheel::models::{format_time, Track};
use mixwheel::scoring::{CompositeScore, Scorer};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mixwheel", version, about = "Harmonic mixing and mashup finder for DJ libraries")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import tracks from a library JSON export
    Import {
        /// Library file (array of tracks, or {"tracks": [...]})
        path: PathBuf,
    },

    /// Analyze audio files (beat grid, structure, mix points)
    Analyze {
        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Force re-analysis of tracks whose audio hasn't changed
        #[arg(long)]
        force: bool,
    },

    /// Find every mashup-compatible pair in the library
    Pairs {
        /// Minimum mashup score (0-100)
        #[arg(long, default_value = "0")]
        min_score: f64,

        /// Maximum BPM difference, on top of the genre tolerance
        #[arg(long)]
        max_delta: Option<f64>,

        /// Number of results
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Find the best mashup partner for a track
    Partner {
        /// Track id
        id: String,
    },

    /// Score two tracks as a transition (or a mashup)
    Score {
        /// Outgoing track id
        a: String,

        /// Incoming track id
        b: String,

        /// Score as a simultaneous mashup instead of a transition
        #[arg(long)]
        mashup: bool,

        /// Print the full score as JSON
        #[arg(long)]
        json: bool,
    },

    /// List keys compatible with a key (Camelot, Open Key or musical notation)
    Keys {
        key: String,
    },

    /// Show a track's analyzed structure and mix points
    Segments {
        /// Track id
        id: String,
    },

    /// Show library statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = mixwheel::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli.db_path
        .or(config.db_path.clone())
        .unwrap_or_else(mixwheel::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = mixwheel::db::Database::open(&db_path)
        .context("Failed to open database")?;
    let scorer = Scorer::from_app_config(&config);

    match cli.command {
        Commands::Import { path } => {
            let result = mixwheel::import::import_library(&db, &path)
                .with_context(|| format!("Import of {} failed", path.display()))?;
            println!(
                "Import complete: {} imported, {} rejected",
                result.imported,
                result.rejected.len()
            );
            for (id, reason) in &result.rejected {
                println!("  {:<20} {}", id, reason);
            }
        }

        Commands::Analyze { jobs, force } => {
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let cancel = mixwheel::cancel::CancelToken::new();
            let result = mixwheel::analyzer::analyze_library(&db, &config, force, workers, &cancel)
                .context("Analysis failed")?;
            println!(
                "Analysis complete: {} analyzed, {} unchanged, {} failed",
                result.analyzed, result.skipped, result.failed
            );
        }

        Commands::Pairs { min_score, max_delta, limit, json } => {
            let tracks = db.get_all_tracks().context("Failed to load library")?;
            let query = mixwheel::pairs::PairQuery::new(min_score, max_delta);
            let pairs = mixwheel::pairs::find_pairs(&tracks, &scorer, &query);

            if json {
                let shown: Vec<_> = pairs.iter().take(limit).collect();
                println!("{}", serde_json::to_string_pretty(&shown)?);
                return Ok(());
            }

            if pairs.is_empty() {
                println!("No compatible pairs found.");
                return Ok(());
            }

            println!("{} compatible pairs (showing {}):", pairs.len(), limit.min(pairs.len()));
            println!();
            println!(
                "{:<28} {:<28} {:>5} {:>6} {:<12} {:>6}",
                "Track A", "Track B", "Keys", "BPM Δ", "Tier", "Score"
            );
            println!("{}", "-".repeat(92));
            for p in pairs.iter().take(limit) {
                println!(
                    "{:<28} {:<28} {:>5} {:>6.1} {:<12} {:>6.1}",
                    truncate(&p.track_a.name, 28),
                    truncate(&p.track_b.name, 28),
                    format!("{}/{}", p.track_a.key, p.track_b.key),
                    p.score.bpm_delta,
                    p.score.tier.as_str(),
                    p.score.total,
                );
            }
        }

        Commands::Partner { id } => {
            let tracks = db.get_all_tracks().context("Failed to load library")?;
            let target = find_track(&tracks, &id)?;
            match mixwheel::pairs::find_best_partner(target, &tracks, &scorer) {
                Some(p) => {
                    println!("Best partner for \"{}\":", target.name);
                    println!();
                    print_track_line(p.track_b);
                    println!();
                    print_score(&p.score);
                }
                None => println!(
                    "No partner scores at least {:.0} for \"{}\".",
                    scorer.config().min_partner_score,
                    target.name
                ),
            }
        }

        Commands::Score { a, b, mashup, json } => {
            let track_a = load_track(&db, &a)?;
            let track_b = load_track(&db, &b)?;

            let score = if mashup {
                scorer.score_mashup(&track_a, &track_b)
            } else {
                let analysis_a = db.get_analysis(&a).context("Query failed")?;
                let analysis_b = db.get_analysis(&b).context("Query failed")?;
                scorer.score_transition_with_analysis(
                    &track_a,
                    &track_b,
                    analysis_a.as_ref(),
                    analysis_b.as_ref(),
                )
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&score)?);
                return Ok(());
            }

            print_track_line(&track_a);
            print_track_line(&track_b);
            println!();
            print_score(&score);
        }

        Commands::Keys { key } => {
            let position: HarmonicPosition = key.parse().context("Unrecognized key")?;
            print_compatible_keys(position, config.keys);
        }

        Commands::Segments { id } => {
            let track = load_track(&db, &id)?;
            let Some(analysis) = db.get_analysis(&id).context("Query failed")? else {
                println!("\"{}\" has not been analyzed. Run `mixwheel analyze` first.", track.name);
                return Ok(());
            };

            println!(
                "{} ({} @ {:.1} BPM, {}/4)",
                track.name,
                format_time(analysis.duration),
                analysis.tempo,
                analysis.beats_per_bar
            );
            println!();
            println!("{:<10} {:>7} {:>7} {:>7} {:>6}", "Segment", "Start", "End", "Energy", "Beats");
            println!("{}", "-".repeat(42));
            for s in &analysis.segments {
                println!(
                    "{:<10} {:>7} {:>7} {:>7.2} {:>6}",
                    s.kind.as_str(),
                    format_time(s.start),
                    format_time(s.end),
                    s.energy,
                    s.beat_count
                );
            }
            println!();
            println!("Mix in:     {}", format_time(analysis.mix_in_point));
            println!("Mix out:    {}", format_time(analysis.mix_out_point));
            if let Some(t) = analysis.drop_point {
                println!("Drop:       {}", format_time(t));
            }
            if let Some(t) = analysis.breakdown_point {
                println!("Breakdown:  {}", format_time(t));
            }
            println!(
                "Crossfade:  {} bars ({:.1}s)",
                analysis.ideal_crossfade_bars,
                analysis.crossfade_seconds()
            );
        }

        Commands::Stats => {
            let stats = db.stats().context("Failed to get stats")?;
            println!("Library Statistics");
            println!("==================");
            println!("Total tracks:     {}", stats.total_tracks);
            println!("With audio:       {}", stats.with_audio);
            println!("Analyzed tracks:  {}", stats.analyzed_tracks);
            println!("With genre:       {}", stats.with_genre);
            println!("With spectral:    {}", stats.with_spectral);
            println!();

            if !stats.keys.is_empty() {
                println!("Keys:");
                for (key, count) in &stats.keys {
                    println!("  {:<4} {}", key, count);
                }
                println!();
            }

            if !stats.genres.is_empty() {
                println!("Genres:");
                for (genre, count) in &stats.genres {
                    println!("  {:<30} {}", genre, count);
                }
            }
        }
    }

    Ok(())
}

fn load_track(db: &mixwheel::db::Database, id: &str) -> Result<Track> {
    db.get_track(id)
        .context("Query failed")?
        .with_context(|| format!("No track with id \"{}\"", id))
}

fn find_track<'a>(tracks: &'a [Track], id: &str) -> Result<&'a Track> {
    tracks
        .iter()
        .find(|t| t.id == id)
        .with_context(|| format!("No track with id \"{}\"", id))
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width - 3).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

fn print_track_line(t: &Track) {
    println!(
        "{:<12} {:<30} {:>6.1} BPM  {:<3}  energy {:.2}  {}",
        t.id,
        truncate(&t.name, 30),
        t.bpm,
        t.key,
        t.energy,
        t.genre.as_deref().unwrap_or("-")
    );
}

fn print_score(score: &CompositeScore) {
    println!("{}", score.description);
    println!();
    for (name, sub) in score.sub_scores() {
        println!("  {:<10} {:>5.1} / {:<3.0}", name, sub.value, sub.max);
    }
    println!("  {:<10} {:>5.1} / 100 ({})", "total", score.total, score.difficulty);
    if score.approximate {
        println!("  (approximate: defaults stood in for missing or unlisted fields)");
    }

    if !score.notes.is_empty() {
        println!();
        for note in &score.notes {
            println!("  - {}", note);
        }
    }
}

/// Print every admitted key from `position`, best tier first.
fn print_compatible_keys(position: HarmonicPosition, options: harmonic::CompatibleSetOptions) {
    println!("Keys compatible with {}:", position);
    println!();
    for other in harmonic::compatible_set(position, options) {
        let result = harmonic::compatible(position, other);
        println!("  {:<4} {:>3}  {}", other, result.score, result.tier.label());
    }
}
