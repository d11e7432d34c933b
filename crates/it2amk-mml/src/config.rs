//! Conversion options and flag parsing.
//!
//! Flags arrive as pair-wise `flag value` tokens, either from the command
//! line or embedded in the module's song message between backtick pairs.
//! Both sources feed [`Options::set_flag`].

use crate::error::ConvertError;

/// Panning translation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanningMode {
    /// Fit against the SPC pan table.
    Accurate,
    /// Linear 0-20 mapping.
    Linear,
}

/// Volume command translation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeCurve {
    /// Inverse search of the engine's volume curve.
    Accurate,
    /// Identity mapping.
    Linear,
    /// Square-law mapping.
    Squared,
}

/// An MML snippet to splice into a channel at a playback position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmlInsert {
    /// Pattern number the snippet anchors to.
    pub pattern: u32,
    /// One-based channel number.
    pub channel: u32,
    /// Row within the pattern.
    pub row: u32,
    /// Tick within the row.
    pub tick: u32,
    /// Literal MML text.
    pub text: String,
}

/// All conversion options with their defaults.
#[derive(Debug, Clone)]
pub struct Options {
    /// Skip the sample conversion phase.
    pub nosmpl: bool,
    /// MML snippets to add.
    pub addmml: Vec<MmlInsert>,
    /// Game title for the SPC header.
    pub game: String,
    /// Author name for the SPC header.
    pub author: String,
    /// SPC length in m:ss.
    pub length: String,
    /// Tempo multiplier.
    pub tmult: f64,
    /// Volume multiplier.
    pub vmult: f64,
    /// Number of SPC chip instances.
    pub chipc: i64,
    /// Volume curve mode.
    pub vcurve: VolumeCurve,
    /// Panning mode.
    pub panning: PanningMode,
    /// Use txxx for Axx commands.
    pub tspeed: bool,
    /// Whether to apply $F4 $02.
    pub legato: bool,
    /// Which volume command handles the v column.
    pub vcmd: String,
    /// Which volume command handles the M effect.
    pub mcmd: String,
    /// Which volume command handles global sample volume.
    pub svcmd: String,
    /// Which volume command handles global instrument volume.
    pub ivcmd: String,
    /// Default resample ratio across all samples.
    pub resample: f64,
    /// Default amplify ratio across all samples.
    pub amplify: f64,
    /// Echo parameters (8 hex digits) or empty.
    pub echo: String,
    /// FIR parameters (16 hex digits) or empty.
    pub fir: String,
    /// Master level, left and right (4 hex digits) or empty.
    pub master: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            nosmpl: false,
            addmml: Vec::new(),
            game: String::new(),
            author: String::new(),
            length: String::new(),
            tmult: 2.0,
            vmult: 1.0,
            chipc: 1,
            vcurve: VolumeCurve::Accurate,
            panning: PanningMode::Accurate,
            tspeed: false,
            legato: true,
            vcmd: "v".to_string(),
            mcmd: "v".to_string(),
            svcmd: "v".to_string(),
            ivcmd: "v".to_string(),
            resample: 1.0,
            amplify: 0.92,
            echo: String::new(),
            fir: String::new(),
            master: String::new(),
        }
    }
}

fn bad(flag: &str, message: impl Into<String>) -> ConvertError {
    ConvertError::BadFlagSyntax {
        flag: flag.to_string(),
        message: message.into(),
    }
}

fn is_hex(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn parse_bool(flag: &str, value: &str) -> Result<bool, ConvertError> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(bad(flag, "must be true or false")),
    }
}

fn parse_real(flag: &str, value: &str) -> Result<f64, ConvertError> {
    value
        .parse::<f64>()
        .map_err(|_| bad(flag, "must be a real number"))
}

fn parse_hex(flag: &str, value: &str, min_len: usize) -> Result<String, ConvertError> {
    if !is_hex(value) {
        Err(bad(flag, "must be a hexadecimal string"))
    } else if value.len() < min_len {
        Err(bad(flag, format!("{:?} is too short", value)))
    } else {
        Ok(value.to_string())
    }
}

/// Canonical flag name for a `-xx` alias or `--name` form. `None` for an
/// unknown alias.
fn canonical(flag: &str) -> Option<&str> {
    let flag = flag.strip_prefix("--").unwrap_or(flag);
    match flag.strip_prefix('-') {
        Some("ns") => Some("nosmpl"),
        Some("mm") => Some("addmml"),
        Some("gm") => Some("game"),
        Some("au") => Some("author"),
        Some("ln") => Some("length"),
        Some("t") => Some("tmult"),
        Some("vm") => Some("vmult"),
        Some("c") => Some("chipc"),
        Some("vc") => Some("vcurve"),
        Some("p") => Some("panning"),
        Some("ts") => Some("tspeed"),
        Some("l") => Some("legato"),
        Some("v") => Some("vcmd"),
        Some("m") => Some("mcmd"),
        Some("sv") => Some("svcmd"),
        Some("iv") => Some("ivcmd"),
        Some("r") => Some("resample"),
        Some("a") => Some("amplify"),
        Some("e") => Some("echo"),
        Some("f") => Some("fir"),
        Some("ml") => Some("master"),
        Some(_) => None,
        None => Some(flag),
    }
}

impl Options {
    /// Apply one flag/value pair. The flag may be an alias (`-t`), a long
    /// name (`--tmult`) or a bare name.
    pub fn set_flag(&mut self, flag: &str, value: &str) -> Result<(), ConvertError> {
        let unknown = || {
            bad(
                flag,
                "does not exist or is not supported in this version of it2amk",
            )
        };
        let name = canonical(flag).ok_or_else(|| unknown())?;
        match name {
            "nosmpl" => self.nosmpl = parse_bool(name, value)?,
            "addmml" => self.addmml.push(Self::parse_addmml(value)?),
            "game" => self.game = value.to_string(),
            "author" => self.author = value.to_string(),
            "length" => {
                let valid = value.split_once(':').is_some_and(|(m, s)| {
                    !m.is_empty()
                        && !s.is_empty()
                        && m.chars().all(|c| c.is_ascii_digit())
                        && s.chars().all(|c| c.is_ascii_digit())
                });
                if !valid {
                    return Err(bad(name, "must be in the format m:ss"));
                }
                self.length = value.to_string();
            }
            "tmult" => self.tmult = parse_real(name, value)?,
            "vmult" => self.vmult = parse_real(name, value)?,
            "chipc" => {
                self.chipc = value
                    .parse::<i64>()
                    .map_err(|_| bad(name, "must be an integer"))?;
            }
            "vcurve" => {
                self.vcurve = match value {
                    "accurate" => VolumeCurve::Accurate,
                    "linear" => VolumeCurve::Linear,
                    "x^2" => VolumeCurve::Squared,
                    _ => return Err(bad(name, "must be accurate, linear or x^2")),
                };
            }
            "panning" => {
                self.panning = match value {
                    "accurate" => PanningMode::Accurate,
                    "linear" => PanningMode::Linear,
                    _ => return Err(bad(name, "must be accurate or linear")),
                };
            }
            "tspeed" => self.tspeed = parse_bool(name, value)?,
            "legato" => self.legato = parse_bool(name, value)?,
            "vcmd" => self.vcmd = value.to_string(),
            "mcmd" => self.mcmd = value.to_string(),
            "svcmd" => self.svcmd = value.to_string(),
            "ivcmd" => self.ivcmd = value.to_string(),
            "resample" => self.resample = parse_real(name, value)?,
            "amplify" => self.amplify = parse_real(name, value)?,
            "echo" => self.echo = parse_hex(name, value, 8)?,
            "fir" => self.fir = parse_hex(name, value, 16)?,
            "master" => self.master = parse_hex(name, value, 4)?,
            _ => return Err(unknown()),
        }
        Ok(())
    }

    /// `pattern:chan:row:tick:text`, with leading numeric fields optional.
    fn parse_addmml(value: &str) -> Result<MmlInsert, ConvertError> {
        let parts: Vec<&str> = value.splitn(5, ':').collect();
        let mut nums = [0u32, 1, 0, 0];
        for (i, part) in parts.iter().take(parts.len() - 1).enumerate() {
            nums[i] = part
                .parse::<u32>()
                .map_err(|_| bad("addmml", "position fields must be integers"))?;
        }
        Ok(MmlInsert {
            pattern: nums[0],
            channel: nums[1],
            row: nums[2],
            tick: nums[3],
            text: parts.last().map(|s| s.to_string()).unwrap_or_default(),
        })
    }

    /// Apply pair-wise `flag value` tokens.
    pub fn apply_pairs(&mut self, tokens: &[String]) -> Result<(), ConvertError> {
        if tokens.len() % 2 != 0 {
            return Err(bad(
                tokens.last().map(String::as_str).unwrap_or(""),
                "missing flag argument",
            ));
        }
        for pair in tokens.chunks(2) {
            self.set_flag(&pair[0], &pair[1])?;
        }
        Ok(())
    }

    /// Extract and apply flags embedded in the module's song message.
    ///
    /// Text between backtick pairs is flag input; spaces inside double
    /// quotes are preserved.
    pub fn apply_message_flags(&mut self, message: &str) -> Result<(), ConvertError> {
        let mut flag_text = String::new();
        let mut interpret = false;
        for c in message.chars() {
            if c == '`' {
                interpret = !interpret;
                flag_text.push(' ');
            } else if interpret {
                flag_text.push(c);
            }
        }
        let flag_text = flag_text
            .replace('\r', "")
            .replace('\n', " ")
            .replace('\t', " ");

        // Escape quoted spaces so whitespace splitting keeps them intact.
        let mut escaped = String::new();
        let mut quote = false;
        for c in flag_text.chars() {
            if c == '"' {
                quote = !quote;
            } else if c == ' ' && quote {
                escaped.push_str("\\s");
            } else {
                escaped.push(c);
            }
        }

        let tokens: Vec<String> = escaped
            .split_whitespace()
            .map(|t| t.replace("\\s", " "))
            .collect();
        if tokens.len() % 2 != 0 {
            return Err(bad(
                tokens.last().map(String::as_str).unwrap_or(""),
                "missing flag argument in module song message",
            ));
        }
        for pair in tokens.chunks(2) {
            self.set_flag(&pair[0], &pair[1])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let o = Options::default();
        assert_eq!(o.tmult, 2.0);
        assert_eq!(o.amplify, 0.92);
        assert_eq!(o.vcurve, VolumeCurve::Accurate);
        assert_eq!(o.panning, PanningMode::Accurate);
        assert!(o.legato);
    }

    #[test]
    fn test_aliases() {
        let mut o = Options::default();
        o.set_flag("-t", "1.5").unwrap();
        o.set_flag("--vmult", "0.5").unwrap();
        o.set_flag("-p", "linear").unwrap();
        assert_eq!(o.tmult, 1.5);
        assert_eq!(o.vmult, 0.5);
        assert_eq!(o.panning, PanningMode::Linear);
    }

    #[test]
    fn test_hex_validation() {
        let mut o = Options::default();
        o.set_flag("-e", "0123ABCD").unwrap();
        assert_eq!(o.echo, "0123ABCD");
        assert!(o.set_flag("-e", "0123").is_err());
        assert!(o.set_flag("-e", "0123ABCZ").is_err());
    }

    #[test]
    fn test_time_validation() {
        let mut o = Options::default();
        o.set_flag("-ln", "2:30").unwrap();
        assert_eq!(o.length, "2:30");
        assert!(o.set_flag("-ln", "230").is_err());
    }

    #[test]
    fn test_unknown_flag() {
        let mut o = Options::default();
        assert!(matches!(
            o.set_flag("-zz", "1"),
            Err(ConvertError::BadFlagSyntax { .. })
        ));
    }

    #[test]
    fn test_addmml_parse() {
        let mut o = Options::default();
        o.set_flag("-mm", "2:3:16:1:$F4 $01").unwrap();
        assert_eq!(
            o.addmml[0],
            MmlInsert {
                pattern: 2,
                channel: 3,
                row: 16,
                tick: 1,
                text: "$F4 $01".to_string(),
            }
        );
    }

    #[test]
    fn test_addmml_defaults() {
        let mut o = Options::default();
        o.set_flag("-mm", "v20").unwrap();
        assert_eq!(o.addmml[0].pattern, 0);
        assert_eq!(o.addmml[0].channel, 1);
        assert_eq!(o.addmml[0].text, "v20");
    }

    #[test]
    fn test_message_flags() {
        let mut o = Options::default();
        o.apply_message_flags("a song\n`-t 1.0 -gm \"My Game\"`\nbye")
            .unwrap();
        assert_eq!(o.tmult, 1.0);
        assert_eq!(o.game, "My Game");
    }

    #[test]
    fn test_message_flags_odd_count() {
        let mut o = Options::default();
        assert!(o.apply_message_flags("`-t`").is_err());
    }

    #[test]
    fn test_pairs_odd_count() {
        let mut o = Options::default();
        assert!(o.apply_pairs(&["-t".to_string()]).is_err());
    }
}
