//! Command-line flags

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use pdaudio_core::Atom;

pub const USAGE: &str = "\
Usage: pdaudio-player [options]

  --config <yaml>        engine config (default: <config_dir>/pdaudio/pdaudio.yaml)
  --patch <file>         patch to open (overrides the config)
  --dir <dir>            directory holding the patch (default: .)
  --seconds <n>          play time before pausing (default: 5)
  --wav <out.wav>        render into a WAV file
  --input <in.wav>       capture from a WAV file (with --wav)
  --fast                 do not pace WAV rendering to real time
  --null                 render as fast as possible, discarding output
  --cpal                 play through the default audio device
  --pd                   use Pure Data instead of the built-in tone engine
  --set <recv>=<value>   send a float or symbol after starting (repeatable)
  --save-config <yaml>   write the effective config and exit
  -h, --help             show this help";

/// Where rendered audio goes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Output {
    /// Software clock, no device
    #[default]
    Clock,
    Null,
    Wav(PathBuf),
    Cpal,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Args {
    pub config: Option<PathBuf>,
    pub patch: Option<String>,
    pub dir: Option<PathBuf>,
    pub seconds: Option<f64>,
    pub output: Output,
    pub input: Option<PathBuf>,
    pub fast: bool,
    pub pd: bool,
    /// `(receiver, value)` pairs in command-line order
    pub sends: Vec<(String, Atom)>,
    pub save_config: Option<PathBuf>,
    pub help: bool,
}

impl Args {
    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut parsed = Args::default();
        let mut iter = args.into_iter();

        while let Some(arg) = iter.next() {
            let mut value = |flag: &str| {
                iter.next()
                    .ok_or_else(|| anyhow!("{} needs a value", flag))
            };
            match arg.as_str() {
                "--config" => parsed.config = Some(value("--config")?.into()),
                "--patch" => parsed.patch = Some(value("--patch")?),
                "--dir" => parsed.dir = Some(value("--dir")?.into()),
                "--seconds" => {
                    let raw = value("--seconds")?;
                    let seconds: f64 = raw
                        .parse()
                        .with_context(|| format!("Invalid --seconds value: {}", raw))?;
                    if !(seconds >= 0.0) {
                        bail!("--seconds must not be negative");
                    }
                    parsed.seconds = Some(seconds);
                }
                "--wav" => parsed.output = Output::Wav(value("--wav")?.into()),
                "--input" => parsed.input = Some(value("--input")?.into()),
                "--fast" => parsed.fast = true,
                "--null" => parsed.output = Output::Null,
                "--cpal" => parsed.output = Output::Cpal,
                "--pd" => parsed.pd = true,
                "--set" => {
                    let raw = value("--set")?;
                    let (receiver, payload) = raw
                        .split_once('=')
                        .filter(|(r, _)| !r.is_empty())
                        .ok_or_else(|| anyhow!("--set expects <receiver>=<value>, got '{}'", raw))?;
                    parsed.sends.push((receiver.to_string(), Atom::parse(payload)));
                }
                "--save-config" => parsed.save_config = Some(value("--save-config")?.into()),
                "-h" | "--help" => parsed.help = true,
                other => bail!("Unknown argument: {}\n\n{}", other, USAGE),
            }
        }

        Ok(parsed)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.seconds.unwrap_or(5.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args> {
        Args::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.output, Output::Clock);
        assert_eq!(args.duration(), Duration::from_secs(5));
        assert!(args.sends.is_empty());
    }

    #[test]
    fn test_full_command_line() {
        let args = parse(&[
            "--patch", "synth.pd", "--dir", "patches", "--seconds", "1.5", "--wav", "out.wav", "--fast",
            "--set", "freq=220", "--set", "wave=saw",
        ])
        .unwrap();
        assert_eq!(args.patch.as_deref(), Some("synth.pd"));
        assert_eq!(args.dir, Some(PathBuf::from("patches")));
        assert_eq!(args.duration(), Duration::from_millis(1500));
        assert_eq!(args.output, Output::Wav(PathBuf::from("out.wav")));
        assert!(args.fast);
        assert_eq!(
            args.sends,
            vec![
                ("freq".to_string(), Atom::Float(220.0)),
                ("wave".to_string(), Atom::Symbol("saw".to_string())),
            ]
        );
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(parse(&["--seconds"]).is_err());
        assert!(parse(&["--seconds", "-1"]).is_err());
        assert!(parse(&["--set", "=1"]).is_err());
        assert!(parse(&["--set", "freq"]).is_err());
        assert!(parse(&["--bogus"]).is_err());
    }
}
