use anyhow::{bail, Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand, ValueEnum};
use smilefit_core::rehab::Exercise;
use std::path::{Path, PathBuf};

mod offline;

#[zbus::proxy(
    interface = "org.smilefit.SmileFit1",
    default_service = "org.smilefit.SmileFit1",
    default_path = "/org/smilefit/SmileFit1"
)]
trait SmileFit {
    fn submit(&self, session: &str, teacher_id: &str, round: u32, image: &[u8]) -> zbus::Result<String>;
    fn list_results(&self, session: &str) -> zbus::Result<String>;
    fn end_session(&self, session: &str) -> zbus::Result<u32>;
    fn feedback(&self, score: f64, user_json: &str, teacher_json: &str) -> zbus::Result<String>;
    fn send_email(&self, address: &str, images: &[String]) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "smilefit", about = "SmileFit expression training CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a captured image for one round
    Submit {
        #[arg(short, long)]
        session: String,
        /// Teacher to compare against (e.g., "emma")
        #[arg(short, long)]
        teacher: String,
        #[arg(short, long)]
        round: u32,
        image: PathBuf,
    },
    /// List a session's round results
    Results {
        #[arg(short, long)]
        session: String,
    },
    /// End a session, deleting its results and images
    End {
        #[arg(short, long)]
        session: String,
    },
    /// Ask for coaching feedback on a round
    Feedback {
        #[arg(long)]
        score: f64,
        /// User AU values as a JSON object
        #[arg(long)]
        user: String,
        /// Teacher AU values as a JSON object
        #[arg(long)]
        teacher: String,
    },
    /// Email result images
    Email {
        #[arg(long)]
        to: String,
        images: Vec<PathBuf>,
    },
    /// Show daemon status
    Status,
    /// Extract AU features from an image without the daemon
    Extract {
        image: PathBuf,
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
    /// Teacher reference datasets
    Teachers {
        #[command(subcommand)]
        command: TeacherCommands,
    },
    /// Rehabilitation metrics for a focused exercise
    Rehab {
        #[arg(long, value_enum)]
        exercise: ExerciseArg,
        /// Relaxed-face capture
        #[arg(long)]
        neutral: PathBuf,
        captures: Vec<PathBuf>,
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum TeacherCommands {
    /// Build references from `<images>/<teacher>/<teacher><round>.png`
    Build {
        #[arg(long)]
        images: PathBuf,
        /// Comma-separated teacher ids
        #[arg(long, value_delimiter = ',', default_value = "emma,olivia,sophia")]
        teachers: Vec<String>,
        #[arg(long, default_value_t = 10)]
        rounds: u32,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        model_dir: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExerciseArg {
    EyebrowRaise,
    EyeClose,
    Smile,
}

impl From<ExerciseArg> for Exercise {
    fn from(arg: ExerciseArg) -> Self {
        match arg {
            ExerciseArg::EyebrowRaise => Exercise::EyebrowRaise,
            ExerciseArg::EyeClose => Exercise::EyeClose,
            ExerciseArg::Smile => Exercise::Smile,
        }
    }
}

/// `data:<mime>;base64,<payload>` for an image file.
fn data_url(path: &Path, bytes: &[u8]) -> String {
    let mime = match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "image/png",
    };
    format!(
        "data:{mime};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

fn print_json(text: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(text).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn proxy() -> Result<SmileFitProxy<'static>> {
    let connection = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    Ok(SmileFitProxy::new(&connection).await?)
}

fn model_dir(arg: Option<PathBuf>) -> PathBuf {
    arg.unwrap_or_else(smilefit_core::default_model_dir)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Submit {
            session,
            teacher,
            round,
            image,
        } => {
            let bytes = std::fs::read(&image).with_context(|| format!("reading {}", image.display()))?;
            let reply = proxy().await?.submit(&session, &teacher, round, &bytes).await?;
            print_json(&reply)?;
        }
        Commands::Results { session } => {
            let reply = proxy().await?.list_results(&session).await?;
            print_json(&reply)?;
        }
        Commands::End { session } => {
            let removed = proxy().await?.end_session(&session).await?;
            println!("Session {session} ended ({removed} results removed)");
        }
        Commands::Feedback { score, user, teacher } => {
            let text = proxy().await?.feedback(score, &user, &teacher).await?;
            println!("{text}");
        }
        Commands::Email { to, images } => {
            if images.is_empty() {
                bail!("no images given");
            }
            let mut urls = Vec::with_capacity(images.len());
            for path in &images {
                let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
                urls.push(data_url(path, &bytes));
            }
            let reply = proxy().await?.send_email(&to, &urls).await?;
            print_json(&reply)?;
        }
        Commands::Status => match proxy().await {
            Ok(p) => print_json(&p.status().await?)?,
            Err(e) => println!("smilefitd: not connected ({e})"),
        },
        Commands::Extract { image, model_dir: dir } => {
            let mut pipeline = offline::Pipeline::load(&model_dir(dir))?;
            let result = pipeline.analyze(&image)?;
            let out = serde_json::json!({
                "face_detected": !result.report.no_face,
                "score": result.score,
                "au_values": result.features,
                "fallbacks": result.report.has_drift(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Teachers {
            command:
                TeacherCommands::Build {
                    images,
                    teachers,
                    rounds,
                    out,
                    model_dir: dir,
                },
        } => {
            let mut pipeline = offline::Pipeline::load(&model_dir(dir))?;
            let dataset = offline::build_teachers(&mut pipeline, &images, &teachers, rounds)?;
            dataset.save(&out)?;
            println!(
                "Wrote {} references for {} teachers to {}",
                dataset.len(),
                dataset.teachers().len(),
                out.display()
            );
        }
        Commands::Rehab {
            exercise,
            neutral,
            captures,
            model_dir: dir,
        } => {
            let mut pipeline = offline::Pipeline::load(&model_dir(dir))?;

            let normalized = |pipeline: &mut offline::Pipeline, path: &Path| -> Result<Option<_>> {
                let image = offline::load_rgb(path)?;
                let (w, h) = image.dimensions();
                Ok(pipeline.landmarks(&image)?.map(|l| l.to_normalized(w, h)))
            };

            let Some(base) = normalized(&mut pipeline, &neutral)? else {
                bail!("no face in neutral capture {}", neutral.display());
            };
            let mut sets = Vec::new();
            for (i, path) in captures.iter().enumerate() {
                match normalized(&mut pipeline, path)? {
                    Some(set) => sets.push((i, set)),
                    None => tracing::warn!(path = %path.display(), "no face, capture skipped"),
                }
            }

            let summary = offline::rehab_summary(&base, &sets, exercise.into())?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
