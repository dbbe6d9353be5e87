use clap::{Args, Parser, Subcommand};
use hostio_core::{Config, ExecOptions, ExecutionResult, Spawned};
use hostio_format::{sprintf, FormatArg};
use hostio_fs::{
    copy_file, decode, fprintf_path, read_file, read_file_text, Encoding, LineReader, StdStream,
};
use hostio_runner::{ProcessLauncher, ShellRunner};
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "hio")]
#[command(about = "Host file and process utilities", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./hostio.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program directly, without a shell
    Exec {
        program: String,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        #[command(flatten)]
        launch: LaunchArgs,
    },

    /// Run a command line through the shell
    Shell {
        command: String,

        #[command(flatten)]
        launch: LaunchArgs,
    },

    /// Signal a process
    Kill {
        pid: u32,

        /// Signal number (default SIGTERM, 0 checks the process exists)
        #[arg(short, long)]
        signal: Option<i32>,
    },

    /// Read a window of a file
    Read {
        file: PathBuf,

        /// Start offset; negative counts from the end
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        offset: i64,

        /// Byte count; 0 or negative stops that far before the end
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        length: i64,

        /// Decode as UTF-8, dropping characters cut by the window
        #[arg(long, conflicts_with = "encoding")]
        text: bool,

        /// Render the bytes with this encoding (utf8, latin1, hex)
        #[arg(long)]
        encoding: Option<Encoding>,
    },

    /// Print the lines of a file with their numbers
    Lines { file: PathBuf },

    /// Copy a file, refusing to write through links
    Copy {
        src: PathBuf,
        dest: PathBuf,

        #[arg(long)]
        overwrite: bool,
    },

    /// Format arguments with a printf-style format string
    Printf {
        format: String,

        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,

        /// Write to this file instead of a standard stream
        #[arg(long)]
        to: Option<PathBuf>,

        /// Append to the --to file rather than truncating it
        #[arg(long, requires = "to")]
        append: bool,

        /// Standard stream to write to (stdout or stderr)
        #[arg(long, default_value = "stdout")]
        stream: StdStream,
    },
}

#[derive(Args)]
struct LaunchArgs {
    /// Timeout in milliseconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Extra environment variable, KEY=VALUE
    #[arg(long = "env", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Start from an empty environment
    #[arg(long)]
    replace_env: bool,

    /// Working directory
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Text written to the child's stdin
    #[arg(long)]
    stdin: Option<String>,

    /// Return immediately, leaving the child running
    #[arg(long)]
    background: bool,
}

impl LaunchArgs {
    fn into_options(self) -> ExecOptions {
        let mut options = ExecOptions::new()
            .replace_env(self.replace_env)
            .background(self.background);
        for (key, value) in self.env {
            options = options.env(key, value);
        }
        if let Some(ms) = self.timeout {
            options = options.timeout_ms(ms);
        }
        if let Some(dir) = self.cwd {
            options = options.cwd(dir);
        }
        if let Some(input) = self.stdin {
            options = options.stdin(input);
        }
        options
    }
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = Config::discover(cli.config.as_deref())?;
    let launcher = ProcessLauncher::new(config.context()?, config.exec.clone());

    match cli.command {
        Commands::Exec {
            program,
            args,
            launch,
        } => {
            let spawned = launcher.exec(&program, args, launch.into_options()).await?;
            report_spawned(&spawned, cli.json)
        }
        Commands::Shell { command, launch } => {
            let spawned = ShellRunner::new(launcher)
                .shell(&command, launch.into_options())
                .await?;
            report_spawned(&spawned, cli.json)
        }
        Commands::Kill { pid, signal } => {
            let delivered = launcher.kill(pid, signal).await;
            if cli.json {
                println!("{}", json!({ "pid": pid, "killed": delivered }));
            } else if delivered {
                println!("✓ Signalled process {}", pid);
            } else {
                println!("Process {} was not signalled", pid);
            }
            Ok(if delivered { 0 } else { 1 })
        }
        Commands::Read {
            file,
            offset,
            length,
            text,
            encoding,
        } => {
            let path = config.context()?.resolve(&file);
            let content = match encoding {
                _ if text => read_file_text(&path, offset, length)?,
                Some(encoding) => decode(&read_file(&path, offset, length)?, encoding)?,
                None => {
                    let bytes = read_file(&path, offset, length)?;
                    if cli.json {
                        decode(&bytes, Encoding::Hex)?
                    } else {
                        std::io::stdout().write_all(&bytes)?;
                        return Ok(0);
                    }
                }
            };
            if cli.json {
                println!(
                    "{}",
                    json!({ "path": path, "offset": offset, "length": length, "content": content })
                );
            } else {
                print!("{}", content);
            }
            Ok(0)
        }
        Commands::Lines { file } => {
            let path = config.context()?.resolve(&file);
            let reader = LineReader::with_capacity(&path, config.fs.chunk_size)?;
            for (idx, line) in reader.enumerate() {
                println!("{:>6}  {}", idx + 1, line?);
            }
            Ok(0)
        }
        Commands::Copy {
            src,
            dest,
            overwrite,
        } => {
            let ctx = config.context()?;
            let (src, dest) = (ctx.resolve(&src), ctx.resolve(&dest));
            let copied = copy_file(&src, &dest, overwrite)?;
            if cli.json {
                println!("{}", json!({ "src": src, "dest": dest, "bytes": copied }));
            } else {
                println!("✓ Copied {} bytes to {}", copied, dest.display());
            }
            Ok(0)
        }
        Commands::Printf {
            format,
            args,
            to,
            append,
            stream,
        } => {
            let args: Vec<FormatArg> = args.iter().map(|a| FormatArg::infer(a)).collect();
            if let Some(file) = to {
                let path = config.context()?.resolve(&file);
                let written = fprintf_path(&path, append, &format, &args)?;
                if cli.json {
                    println!("{}", json!({ "path": path, "bytes": written }));
                }
            } else if cli.json {
                let rendered = sprintf(&format, &args)?;
                println!("{}", json!({ "output": rendered }));
            } else {
                stream.fprintf(&format, &args)?;
                stream.fflush()?;
            }
            Ok(0)
        }
    }
}

fn report_spawned(spawned: &Spawned, json: bool) -> anyhow::Result<i32> {
    if json {
        println!("{}", serde_json::to_string_pretty(spawned)?);
    }

    match spawned {
        Spawned::Background(handle) => {
            if !json {
                println!("✓ Started background process {}", handle.pid);
            }
            Ok(0)
        }
        Spawned::Completed(result) => {
            if !json {
                print_result(result)?;
            }
            Ok(exit_code(result))
        }
    }
}

fn print_result(result: &ExecutionResult) -> anyhow::Result<()> {
    std::io::stdout().write_all(result.stdout.as_bytes())?;
    std::io::stderr().write_all(result.stderr.as_bytes())?;
    if result.timed_out {
        eprintln!("Process {} timed out after {}ms", result.pid, result.duration_ms);
    }
    Ok(())
}

/// Mirrors the child's status the way a shell reports it
fn exit_code(result: &ExecutionResult) -> i32 {
    match (result.status, result.signal) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("A=b=c").unwrap(),
            ("A".to_string(), "b=c".to_string())
        );
        assert_eq!(parse_env_pair("EMPTY=").unwrap(), ("EMPTY".to_string(), String::new()));
        assert!(parse_env_pair("=x").is_err());
        assert!(parse_env_pair("novalue").is_err());
    }

    #[test]
    fn test_cli_parses_exec_with_trailing_args() {
        let cli = Cli::try_parse_from([
            "hio", "--json", "exec", "--timeout", "500", "--env", "K=V", "ls", "-l", "/tmp",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Exec {
                program,
                args,
                launch,
            } => {
                assert_eq!(program, "ls");
                assert_eq!(args, vec!["-l", "/tmp"]);
                let options = launch.into_options();
                assert_eq!(options.timeout_ms, Some(500));
                assert_eq!(options.env.get("K").map(String::as_str), Some("V"));
            }
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn test_cli_parses_negative_window() {
        let cli = Cli::try_parse_from([
            "hio", "read", "f.txt", "--offset", "-220", "--length", "-20", "--text",
        ])
        .unwrap();
        match cli.command {
            Commands::Read {
                offset,
                length,
                text,
                ..
            } => {
                assert_eq!(offset, -220);
                assert_eq!(length, -20);
                assert!(text);
            }
            _ => panic!("expected read"),
        }
    }
}
