/// Parse an ISO-8601 duration of the form YouTube returns (`PT1M30S`,
/// `P1DT2H`, `PT45S`) into whole seconds. Year and month designators are
/// rejected because their length is ambiguous.
#[must_use]
pub fn parse_iso8601_duration(raw: &str) -> Option<u64> {
    let rest = raw.trim().strip_prefix('P')?;
    if rest.is_empty() {
        return None;
    }

    let mut total: u64 = 0;
    let mut in_time = false;
    let mut digits = String::new();
    let mut saw_component = false;
    let mut saw_time_component = false;

    for c in rest.chars() {
        match c {
            'T' => {
                if in_time || !digits.is_empty() {
                    return None;
                }
                in_time = true;
            }
            '0'..='9' | '.' => digits.push(c),
            designator => {
                if digits.is_empty() {
                    return None;
                }
                let multiplier = match (in_time, designator) {
                    (false, 'W') => 7 * 86_400,
                    (false, 'D') => 86_400,
                    (true, 'H') => 3_600,
                    (true, 'M') => 60,
                    (true, 'S') => 1,
                    _ => return None,
                };
                let value: f64 = digits.parse().ok()?;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let seconds = (value * f64::from(multiplier)).floor() as u64;
                total = total.checked_add(seconds)?;
                digits.clear();
                saw_component = true;
                saw_time_component |= in_time;
            }
        }
    }

    // A `T` must introduce at least one time component.
    (digits.is_empty() && saw_component && (!in_time || saw_time_component)).then_some(total)
}
