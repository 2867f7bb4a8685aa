/// Events requested from `perf stat`, in the order they are passed to `-e`.
pub const PERF_EVENTS: [&str; 5] = [
    "instructions",
    "cycles",
    "cache-misses",
    "L1-dcache-load-misses",
    "LLC-load-misses",
];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CounterMetrics {
    pub instructions: Option<u64>,
    pub cycles: Option<u64>,
    pub ipc: Option<f64>,
    pub cache_misses: Option<u64>,
    pub l1_misses: Option<u64>,
    pub llc_misses: Option<u64>,
}

impl CounterMetrics {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct CounterParser;

impl CounterParser {
    /// Extracts counters from the text report `perf stat` writes to stderr.
    ///
    /// Lines that do not start with a count followed by a known event label
    /// are ignored, so truncated or noisy output yields whatever metrics were
    /// present. Counts for the same event reported by several PMUs (hybrid
    /// cores print `cpu_core/...` and `cpu_atom/...`) are summed.
    pub fn parse(raw: &str) -> CounterMetrics {
        let mut metrics = CounterMetrics::default();

        for line in raw.lines() {
            let mut tokens = line.split_whitespace();
            let (Some(count), Some(label)) = (tokens.next(), tokens.next()) else {
                continue;
            };
            let Ok(value) = count.replace(',', "").parse::<u64>() else {
                continue;
            };

            let slot = match event_name(label) {
                "instructions" => &mut metrics.instructions,
                "cycles" => &mut metrics.cycles,
                "cache-misses" => &mut metrics.cache_misses,
                "L1-dcache-load-misses" => &mut metrics.l1_misses,
                "LLC-load-misses" => &mut metrics.llc_misses,
                _ => continue,
            };
            *slot = Some(slot.map_or(value, |seen| seen.saturating_add(value)));
        }

        metrics.ipc = match (metrics.instructions, metrics.cycles) {
            (Some(instructions), Some(cycles)) if cycles > 0 => {
                Some(instructions as f64 / cycles as f64)
            }
            _ => None,
        };
        metrics
    }
}

// "cpu_core/instructions/" -> "instructions", "cycles:u" -> "cycles"
fn event_name(label: &str) -> &str {
    let event = label
        .split('/')
        .nth(1)
        .filter(|event| !event.is_empty())
        .unwrap_or(label);
    event.split(':').next().unwrap_or(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERF_REPORT: &str = "
 Performance counter stats for './dot 1000000':

         1,234,567      instructions                     #    0.62  insn per cycle
         2,000,000      cycles
            45,678      cache-misses
            12,345      L1-dcache-load-misses
             6,789      LLC-load-misses
         1,111,111      stalled-cycles-frontend

       0.012345678 seconds time elapsed

       0.010000000 seconds user
       0.002000000 seconds sys
";

    #[test]
    fn parses_full_perf_report() {
        let metrics = CounterParser::parse(PERF_REPORT);
        assert_eq!(metrics.instructions, Some(1_234_567));
        assert_eq!(metrics.cycles, Some(2_000_000));
        assert_eq!(metrics.cache_misses, Some(45_678));
        assert_eq!(metrics.l1_misses, Some(12_345));
        assert_eq!(metrics.llc_misses, Some(6_789));
        let ipc = metrics.ipc.unwrap();
        assert!((ipc - 0.6172835).abs() < 1e-9);
    }

    #[test]
    fn two_line_minimum_example() {
        let metrics = CounterParser::parse("1,234,567 instructions\n2,000,000 cycles\n");
        assert_eq!(metrics.instructions, Some(1_234_567));
        assert_eq!(metrics.cycles, Some(2_000_000));
        assert!((metrics.ipc.unwrap() - 0.6172835).abs() < 1e-6);
        assert_eq!(metrics.cache_misses, None);
    }

    #[test]
    fn text_without_counters_yields_empty_metrics() {
        let metrics = CounterParser::parse("Dot product benchmark: vector size = 100\nresult 42\n");
        assert!(metrics.is_empty());
        assert!(CounterParser::parse("").is_empty());
    }

    #[test]
    fn unsupported_and_uncounted_events_are_skipped() {
        let raw = "     <not supported>      cycles\n     <not counted>      instructions\n";
        let metrics = CounterParser::parse(raw);
        assert!(metrics.is_empty());
    }

    #[test]
    fn ipc_absent_for_zero_cycles() {
        let metrics = CounterParser::parse("100 instructions\n0 cycles\n");
        assert_eq!(metrics.cycles, Some(0));
        assert_eq!(metrics.ipc, None);
    }

    #[test]
    fn hybrid_pmu_counts_are_summed_and_modifiers_ignored() {
        let raw = "
           300      cpu_core/instructions/
           200      cpu_atom/instructions/
           250      cycles:u
";
        let metrics = CounterParser::parse(raw);
        assert_eq!(metrics.instructions, Some(500));
        assert_eq!(metrics.cycles, Some(250));
        assert_eq!(metrics.ipc, Some(2.0));
    }

    #[test]
    fn truncated_output_keeps_partial_metrics() {
        let truncated = &PERF_REPORT[..PERF_REPORT.find("cache-misses").unwrap()];
        let metrics = CounterParser::parse(truncated);
        assert_eq!(metrics.instructions, Some(1_234_567));
        assert_eq!(metrics.cycles, Some(2_000_000));
        assert_eq!(metrics.llc_misses, None);
    }
}
