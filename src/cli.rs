use crate::config::RuntimeConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOverrides {
    fault_threshold: Option<u32>,
    max_operations: Option<u64>,
    trace: Option<bool>,
}

impl CliOverrides {
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // program name
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            let Some(key) = flag.strip_prefix("--") else {
                bail!("Unexpected argument '{flag}'. Use --fault-threshold/--max-operations/--trace with values.");
            };
            let value = iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            overrides.apply(key, flag, &value)?;
        }
        Ok(overrides)
    }

    /// Applies one `--key value` pair. Returns an error for unknown keys.
    pub fn apply(&mut self, key: &str, flag: &str, value: &str) -> Result<()> {
        match key {
            "fault-threshold" => {
                self.fault_threshold =
                    Some(value.parse::<u32>().with_context(|| format!("Invalid fault threshold '{value}'"))?);
            }
            "max-operations" => {
                self.max_operations =
                    Some(value.parse::<u64>().with_context(|| format!("Invalid operation budget '{value}'"))?);
            }
            "trace" => {
                self.trace = Some(parse_bool_flag("trace", value)?);
            }
            _ => bail!("Unknown flag '{flag}'. Supported flags: --fault-threshold, --max-operations, --trace."),
        }
        Ok(())
    }

    pub fn into_config_overrides(self) -> RuntimeConfigOverrides {
        RuntimeConfigOverrides {
            fault_threshold: self.fault_threshold,
            max_operations: self.max_operations,
            trace: self.trace,
        }
    }

    #[cfg(test)]
    pub fn as_tuple(&self) -> (Option<u32>, Option<u64>, Option<bool>) {
        (self.fault_threshold, self.max_operations, self.trace)
    }
}

fn parse_bool_flag(flag: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("Invalid {flag} value '{other}'. Use on/off or true/false."),
    }
}
