use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "rewards-daemon", about = "Delegation-state reconstruction service", version)]
pub struct Cli {
    /// Path to the runtime configuration file (without extension; `config`
    /// resolves `.json`/`.toml`/etc itself).
    #[arg(long, default_value = "config")]
    pub config: String,

    /// Log level filter, e.g. `info`, `rewards_engine=debug`. Overrides
    /// `LOG_LEVEL` when given.
    #[arg(long)]
    pub log: Option<String>,

    /// Runs a single reconstruction and exits instead of starting the
    /// service: either `address:cycle` for one baker, or a bare `cycle` for
    /// every active delegate of that cycle.
    #[arg(long, value_name = "addr:cycle|cycle")]
    pub test: Option<String>,

    /// Accepted for compatibility; this service has no on-disk chain cache.
    #[arg(long, value_name = "path")]
    pub cache: Option<String>,
}

/// What `--test` resolved to.
pub enum TestTarget {
    Delegate { address: String, cycle: i64 },
    Cycle(i64),
}

pub fn parse_test_target(raw: &str) -> anyhow::Result<TestTarget> {
    if let Some((address, cycle)) = raw.split_once(':') {
        let cycle = cycle
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid cycle in --test {raw}"))?;
        Ok(TestTarget::Delegate {
            address: address.to_string(),
            cycle,
        })
    } else {
        let cycle = raw
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid --test value: {raw}"))?;
        Ok(TestTarget::Cycle(cycle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_addr_cycle_pair() {
        let target = parse_test_target("tz1Baker:750").unwrap();
        match target {
            TestTarget::Delegate { address, cycle } => {
                assert_eq!(address, "tz1Baker");
                assert_eq!(cycle, 750);
            }
            TestTarget::Cycle(_) => panic!("expected Delegate"),
        }
    }

    #[test]
    fn parses_bare_cycle() {
        let target = parse_test_target("750").unwrap();
        match target {
            TestTarget::Cycle(cycle) => assert_eq!(cycle, 750),
            TestTarget::Delegate { .. } => panic!("expected Cycle"),
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_test_target("not-a-number").is_err());
    }
}
