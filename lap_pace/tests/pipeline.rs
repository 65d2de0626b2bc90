use lap_pace::{
    clean_laps, fit_trend, render, Color, Lap, LineStyle, PaceError, PaceParams, SkipReason,
    StyleRank, TeamColors,
};

struct TwoTeams;

impl TeamColors for TwoTeams {
    fn team_color(&self, team: &str) -> Result<Color, PaceError> {
        match team {
            "X" => Ok(Color::rgb(200, 0, 0)),
            "Y" => Ok(Color::rgb(0, 0, 200)),
            other => Err(PaceError::UnknownTeam(other.to_string())),
        }
    }
}

fn stint(driver: &str, team: &str, laps: u32, base: f64) -> Vec<Lap> {
    (1..=laps)
        .map(|n| {
            let lap = Lap::new(
                driver,
                team,
                n,
                Some(base + 0.01 * ((n * 13) % 7) as f64 - 0.02 * n as f64),
            );
            if n == 1 {
                lap.pit()
            } else {
                lap
            }
        })
        .collect()
}

fn drivers(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn three_driver_session_with_long_lap() {
    let laps = vec![
        Lap::new("A", "X", 1, Some(150.0)).pit(),
        Lap::new("A", "X", 2, Some(90.0)),
        Lap::new("A", "X", 3, Some(91.0)),
        Lap::new("A", "X", 4, Some(200.0)),
        Lap::new("B", "Y", 1, Some(140.0)).pit(),
        Lap::new("B", "Y", 2, Some(90.4)),
        Lap::new("B", "Y", 3, Some(90.9)),
        Lap::new("C", "X", 1, Some(145.0)).pit(),
        Lap::new("C", "X", 2, Some(90.6)),
        Lap::new("C", "X", 3, Some(91.2)),
    ];
    let cleaned = clean_laps(&laps, 1.5);

    let a = cleaned.driver_series("A").unwrap();
    assert_eq!(a.len(), 2);
    assert_eq!(a.lap_numbers(), vec![2, 3]);
    for driver in ["A", "B", "C"] {
        let series = cleaned.driver_series(driver).unwrap();
        assert!(!series.lap_numbers().contains(&1));
    }
}

#[test]
fn ordering_decides_primary_and_colour_follows_team() {
    let mut laps = stint("A", "X", 20, 92.0);
    laps.extend(stint("B", "Y", 20, 92.3));
    laps.extend(stint("C", "X", 20, 92.1));
    let cleaned = clean_laps(&laps, 1.5);
    let params = PaceParams::default();

    let figure = render(&cleaned, &drivers(&["A", "B", "C"]), "GP", &params, &TwoTeams);
    let a = figure.trend_for("A").unwrap();
    let b = figure.trend_for("B").unwrap();
    let c = figure.trend_for("C").unwrap();
    assert_eq!((a.style.rank, a.style.color), (StyleRank::Primary, Color::rgb(200, 0, 0)));
    assert_eq!((b.style.rank, b.style.color), (StyleRank::Primary, Color::rgb(0, 0, 200)));
    assert_eq!((c.style.rank, c.style.color), (StyleRank::Secondary, Color::rgb(200, 0, 0)));
    assert_eq!(c.style.linestyle, LineStyle::Dotted);

    let again = render(&cleaned, &drivers(&["A", "B", "C"]), "GP", &params, &TwoTeams);
    assert_eq!(figure, again);
}

#[test]
fn trend_follows_series_domain() {
    let laps = stint("A", "X", 25, 92.0);
    let cleaned = clean_laps(&laps, 1.5);
    let series = cleaned.driver_series("A").unwrap();
    let curve = fit_trend(&series, 5).unwrap();
    assert_eq!(curve.len(), series.len());
    let domain: Vec<u32> = curve.points.iter().map(|(n, _)| *n).collect();
    assert_eq!(domain, series.lap_numbers());
}

#[test]
fn absent_driver_and_unknown_team_keep_rendering() {
    let mut laps = stint("A", "X", 20, 92.0);
    laps.extend(stint("Z", "Unlisted Racing", 20, 92.2));
    let cleaned = clean_laps(&laps, 1.5);
    let params = PaceParams::default();

    let figure = render(&cleaned, &drivers(&["GHOST", "Z", "A"]), "GP", &params, &TwoTeams);
    assert_eq!(figure.trends.len(), 2);
    assert_eq!(figure.skipped.len(), 1);
    assert_eq!(figure.skipped[0].reason, SkipReason::Missing);
    assert_eq!(figure.trend_for("Z").unwrap().style.color, params.fallback_color);
}

#[test]
fn highlight_background_only_when_team_drawn() {
    let mut laps = stint("A", "X", 20, 92.0);
    laps.extend(stint("B", "Y", 20, 92.1));
    let cleaned = clean_laps(&laps, 1.5);
    let params = PaceParams {
        highlight_team: "Y".to_string(),
        ..PaceParams::default()
    };

    let with = render(&cleaned, &drivers(&["A", "B"]), "GP", &params, &TwoTeams);
    assert_eq!(with.trend_background, Some(params.highlight_background));
    let without = render(&cleaned, &drivers(&["A"]), "GP", &params, &TwoTeams);
    assert_eq!(without.trend_background, None);
}
