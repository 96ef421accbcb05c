use super::*;

#[test]
fn test_steady_stream_has_no_jitter() {
    let mut calc = JitterCalc::new(90000);
    for i in 0..100u32 {
        // 30 fps, perfectly paced
        calc.put_inter_arrival_data(i * 3000, i as i64 * 33_333);
        calc.put_base_data(i * 3000, i as i64 * 33_333);
    }
    assert!(calc.inter_arrival_jitter_ticks() <= 1);
    assert_eq!(calc.base_jitter_ms(), 0);
}

#[test]
fn test_alternating_delay_converges() {
    let mut calc = JitterCalc::new(8000);
    for i in 0..2000i64 {
        // 20 ms packets, every other one 10 ms late
        let late = if i % 2 == 1 { 10_000 } else { 0 };
        calc.put_inter_arrival_data((i * 160) as u32, i * 20_000 + late);
    }
    // D is 80 ticks (10 ms) on every packet
    let j = calc.inter_arrival_jitter_ms();
    assert!((9..=10).contains(&j), "jitter {j} ms");
}

#[test]
fn test_rtp_wraparound() {
    let mut calc = JitterCalc::new(90000);
    let start = u32::MAX - 3000;
    calc.put_inter_arrival_data(start, 0);
    calc.put_inter_arrival_data(start.wrapping_add(3000), 33_333);
    calc.put_inter_arrival_data(start.wrapping_add(6000), 66_667);
    assert!(calc.inter_arrival_jitter_ticks() <= 1);
}

#[test]
fn test_init_seeds_base_jitter() {
    let mut calc = JitterCalc::new(90000);
    calc.put_base_data(0, 0);
    calc.put_base_data(3000, 500_000);
    assert!(calc.samples() > 0);

    calc.init(1000, 1_000_000, 40_000);
    assert_eq!(calc.samples(), 0);
    assert_eq!(calc.base_jitter_ms(), 40);
    assert_eq!(calc.inter_arrival_jitter_ms(), 0);
}
