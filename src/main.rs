use camino::Utf8PathBuf;
use clap::Parser;

/// Asset build runner for WordPress plugins.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Task to run: styles, scripts, images, translate, changelog, readme,
    /// watch or default.
    #[arg(default_value = "default")]
    task: String,

    /// Project root, the current directory by default.
    #[arg(long, value_name = "DIR")]
    cwd: Option<Utf8PathBuf>,

    /// Print the task tree and exit.
    #[arg(long)]
    tasks: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.tasks {
        print!("{}", wpbuild::task_tree());
        return Ok(());
    }

    wpbuild::logging::init()?;

    let root = match args.cwd {
        Some(dir) => dir,
        None => Utf8PathBuf::try_from(std::env::current_dir()?)?,
    };

    wpbuild::run(&root, &args.task)?;
    Ok(())
}
