//! Now-playing overlay text.
//!
//! The text source shows `"<title> <elapsed>/<total>"`. Times are `MM:SS`
//! for items shorter than an hour and `HH:MM:SS` otherwise; both halves use
//! the same width. While the engine has not reported a duration yet the
//! overlay shows the title alone.

const HOUR_S: u64 = 3600;

/// Render the overlay string for a playing item.
///
/// `elapsed_s` is clamped to `total_s`: near end-of-file the engine can
/// report a cursor slightly past the duration.
///
/// A `total_s` of `Some(0)` is treated like `None`: a zero-length item has no
/// meaningful timecode and would otherwise render `00:00/00:00`.
pub fn format(title: &str, elapsed_s: u64, total_s: Option<u64>) -> String {
    let Some(total) = total_s.filter(|t| *t > 0) else {
        return title.to_string();
    };

    let elapsed = elapsed_s.min(total);
    let with_hours = total >= HOUR_S;
    format!(
        "{} {}/{}",
        title,
        fmt_timecode(elapsed, with_hours),
        fmt_timecode(total, with_hours)
    )
}

fn fmt_timecode(total_s: u64, with_hours: bool) -> String {
    let h = total_s / HOUR_S;
    let m = (total_s % HOUR_S) / 60;
    let s = total_s % 60;
    if with_hours {
        format!("{:02}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_minutes_and_seconds() {
        assert_eq!(format("S01E03", 84, Some(1344)), "S01E03 01:24/22:24");
        assert_eq!(format("S01E03", 0, Some(1344)), "S01E03 00:00/22:24");
    }

    #[test]
    fn switches_to_hours_at_one_hour() {
        assert_eq!(format("MOVIE", 59, Some(3599)), "MOVIE 00:59/59:59");
        assert_eq!(format("MOVIE", 59, Some(3600)), "MOVIE 00:00:59/01:00:00");
        assert_eq!(format("MOVIE", 5025, Some(7384)), "MOVIE 01:23:45/02:03:04");
    }

    #[test]
    fn minute_format_for_every_sub_hour_duration() {
        for d in (0..3600).step_by(7) {
            let text = format("T", d / 2, Some(d));
            if d == 0 {
                assert_eq!(text, "T");
                continue;
            }
            let times = text.strip_prefix("T ").unwrap();
            let (el, tot) = times.split_once('/').unwrap();
            assert_eq!(el.len(), 5, "{text}");
            assert_eq!(tot.len(), 5, "{text}");
        }
    }

    #[test]
    fn unknown_duration_shows_title_only() {
        let text = format("S02E10", 42, None);
        assert_eq!(text, "S02E10");
        assert!(!text.contains('/'));
        assert!(!format("S02E10", 42, Some(0)).contains('/'));
    }

    #[test]
    fn clamps_elapsed_past_the_end() {
        assert_eq!(format("S01E03", 1350, Some(1344)), format("S01E03", 1344, Some(1344)));
        assert_eq!(format("S01E03", 1350, Some(1344)), "S01E03 22:24/22:24");
    }
}
