/// Parses a human duration in to a number of seconds.
/// Accepts a bare integer (seconds) or an integer followed by one of
/// the unit suffixes s/m/h/d/w, eg "90", "15m", "6h", "2w".
pub fn parse_seconds(input: &str) -> anyhow::Result<u64> {
    if let Ok(seconds) = input.parse::<u64>() {
        return Ok(seconds);
    }

    let Some(unit) = input.chars().last() else {
        anyhow::bail!("empty duration string")
    };

    let seconds_per_unit: u64 = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        'w' => 604800,
        _ => anyhow::bail!("unknown duration unit '{unit}' in {input:?}"),
    };

    let count: u64 = input[..input.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| anyhow::anyhow!("could not convert {input:?} to a number of seconds"))?;

    Ok(count * seconds_per_unit)
}
