use rand::Rng;
use serde_json::{json, Map, Value};
use sysinfo::{CpuExt, DiskExt, System, SystemExt};

const TEMP_DRIFT_STEP: f64 = 0.1;
const TEMP_DRIFT_LIMIT: f64 = 5.0;
const TEMP_MIN: f64 = 15.0;
const TEMP_MAX: f64 = 35.0;

const HUMIDITY_DRIFT_STEP: f64 = 0.2;
const HUMIDITY_DRIFT_LIMIT: f64 = 10.0;
const HUMIDITY_MIN: f64 = 20.0;
const HUMIDITY_MAX: f64 = 90.0;

const PRESSURE_DRIFT_STEP: f64 = 0.1;
const PRESSURE_DRIFT_LIMIT: f64 = 5.0;
const PRESSURE_MIN: f64 = 980.0;
const PRESSURE_MAX: f64 = 1040.0;

const WIND_STEP: f64 = 0.5;
const WIND_MAX: f64 = 20.0;

/// One full set of sensor values for a single tick. Extra fields from
/// specialized generators ride in `extra` and serialize flattened.
#[derive(Debug, Clone)]
pub struct SensorReading {
    pub temperature: f64,
    pub humidity: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
    pub battery_level: f64,
    pub signal_strength: i32,
    pub extra: Map<String, Value>,
}

pub trait SensorGenerator: Send {
    fn generate_data(&mut self) -> SensorReading;
}

/// Generates realistic sensor data for a virtual device. Temperature and
/// humidity follow a bounded random walk around a per-instance base value:
/// the drift is clamped first, then the summed result is clamped again so
/// the walk self-corrects toward the base without ever leaving the
/// physically plausible range. CPU, memory and disk usage are read from the
/// host rather than synthesized.
pub struct SensorDataGenerator {
    base_temperature: f64,
    base_humidity: f64,
    temp_drift: f64,
    humid_drift: f64,
    system: System,
}

impl SensorDataGenerator {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            base_temperature: rng.gen_range(20.0..=25.0),
            base_humidity: rng.gen_range(45.0..=55.0),
            temp_drift: 0.0,
            humid_drift: 0.0,
            system: System::new(),
        }
    }

    fn temperature(&mut self, rng: &mut impl Rng) -> f64 {
        self.temp_drift = (self.temp_drift + rng.gen_range(-TEMP_DRIFT_STEP..=TEMP_DRIFT_STEP))
            .clamp(-TEMP_DRIFT_LIMIT, TEMP_DRIFT_LIMIT);
        round2((self.base_temperature + self.temp_drift).clamp(TEMP_MIN, TEMP_MAX))
    }

    fn humidity(&mut self, rng: &mut impl Rng) -> f64 {
        self.humid_drift = (self.humid_drift
            + rng.gen_range(-HUMIDITY_DRIFT_STEP..=HUMIDITY_DRIFT_STEP))
        .clamp(-HUMIDITY_DRIFT_LIMIT, HUMIDITY_DRIFT_LIMIT);
        round2((self.base_humidity + self.humid_drift).clamp(HUMIDITY_MIN, HUMIDITY_MAX))
    }

    /// Host load counters. CPU usage is computed from the delta between
    /// refreshes, so the first reading after startup can be zero.
    fn system_metrics(&mut self) -> (f64, f64, f64) {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.system.refresh_disks_list();
        self.system.refresh_disks();

        let cpu = self.system.global_cpu_info().cpu_usage() as f64;

        let total_memory = self.system.total_memory();
        let memory = if total_memory == 0 {
            0.0
        } else {
            self.system.used_memory() as f64 / total_memory as f64 * 100.0
        };

        let (total_disk, available_disk) = self
            .system
            .disks()
            .iter()
            .fold((0u64, 0u64), |(total, avail), disk| {
                (total + disk.total_space(), avail + disk.available_space())
            });
        let disk = if total_disk == 0 {
            0.0
        } else {
            (total_disk - available_disk) as f64 / total_disk as f64 * 100.0
        };

        (round2(cpu), round2(memory), round2(disk))
    }
}

impl SensorGenerator for SensorDataGenerator {
    fn generate_data(&mut self) -> SensorReading {
        let mut rng = rand::thread_rng();
        let temperature = self.temperature(&mut rng);
        let humidity = self.humidity(&mut rng);
        let (cpu_usage, memory_usage, disk_usage) = self.system_metrics();

        SensorReading {
            temperature,
            humidity,
            cpu_usage,
            memory_usage,
            disk_usage,
            battery_level: round2(rng.gen_range(50.0..=100.0)),
            signal_strength: rng.gen_range(-90..=-30),
            extra: Map::new(),
        }
    }
}

/// Weather-station variant. Layers atmospheric pressure (same drift/clamp
/// pattern as temperature), a wind speed walk with no re-basing, a uniform
/// wind direction, gusts above the current wind speed, rain rate and UV
/// index onto every base reading.
pub struct WeatherSensorGenerator {
    base: SensorDataGenerator,
    base_pressure: f64,
    pressure_drift: f64,
    wind_speed: f64,
}

impl WeatherSensorGenerator {
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            base: SensorDataGenerator::new(),
            base_pressure: rng.gen_range(1000.0..=1020.0),
            pressure_drift: 0.0,
            wind_speed: rng.gen_range(0.0..10.0),
        }
    }

    fn pressure(&mut self, rng: &mut impl Rng) -> f64 {
        self.pressure_drift = (self.pressure_drift
            + rng.gen_range(-PRESSURE_DRIFT_STEP..=PRESSURE_DRIFT_STEP))
        .clamp(-PRESSURE_DRIFT_LIMIT, PRESSURE_DRIFT_LIMIT);
        round2((self.base_pressure + self.pressure_drift).clamp(PRESSURE_MIN, PRESSURE_MAX))
    }
}

impl SensorGenerator for WeatherSensorGenerator {
    fn generate_data(&mut self) -> SensorReading {
        let mut reading = self.base.generate_data();
        let mut rng = rand::thread_rng();

        let pressure = self.pressure(&mut rng);
        self.wind_speed = (self.wind_speed + rng.gen_range(-WIND_STEP..=WIND_STEP)).clamp(0.0, WIND_MAX);

        reading.extra.insert("pressure".into(), json!(pressure));
        reading
            .extra
            .insert("wind_speed".into(), json!(round2(self.wind_speed)));
        reading
            .extra
            .insert("wind_direction".into(), json!(rng.gen_range(0..360)));
        reading.extra.insert(
            "wind_gust".into(),
            json!(round2(self.wind_speed + rng.gen_range(0.0..=5.0))),
        );
        reading
            .extra
            .insert("rain_rate".into(), json!(round2(rng.gen_range(0.0..=5.0))));
        reading
            .extra
            .insert("uv_index".into(), json!(round1(rng.gen_range(0.0..=11.0))));
        reading
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readings_stay_within_absolute_bounds() {
        let mut generator = SensorDataGenerator::new();
        for _ in 0..1000 {
            let reading = generator.generate_data();
            assert!(
                (TEMP_MIN..=TEMP_MAX).contains(&reading.temperature),
                "temperature {} escaped bounds",
                reading.temperature
            );
            assert!(
                (HUMIDITY_MIN..=HUMIDITY_MAX).contains(&reading.humidity),
                "humidity {} escaped bounds",
                reading.humidity
            );
        }
    }

    #[test]
    fn drift_never_escapes_its_limits() {
        let mut generator = SensorDataGenerator::new();
        for _ in 0..1000 {
            generator.generate_data();
            assert!(generator.temp_drift.abs() <= TEMP_DRIFT_LIMIT + f64::EPSILON);
            assert!(generator.humid_drift.abs() <= HUMIDITY_DRIFT_LIMIT + f64::EPSILON);
        }
    }

    #[test]
    fn first_reading_stays_near_base() {
        let mut generator = SensorDataGenerator {
            base_temperature: 22.0,
            base_humidity: 50.0,
            temp_drift: 0.0,
            humid_drift: 0.0,
            system: System::new(),
        };
        let reading = generator.generate_data();
        assert!(
            (reading.temperature - 22.0).abs() <= TEMP_DRIFT_STEP + 1e-9,
            "first reading {} drifted more than one step from base",
            reading.temperature
        );
    }

    #[test]
    fn battery_and_signal_stay_in_range() {
        let mut generator = SensorDataGenerator::new();
        for _ in 0..100 {
            let reading = generator.generate_data();
            assert!((50.0..=100.0).contains(&reading.battery_level));
            assert!((-90..=-30).contains(&reading.signal_strength));
        }
    }

    #[test]
    fn weather_generator_layers_bounded_extras() {
        let mut generator = WeatherSensorGenerator::new();
        for _ in 0..500 {
            let reading = generator.generate_data();
            let pressure = reading.extra["pressure"].as_f64().unwrap();
            assert!((PRESSURE_MIN..=PRESSURE_MAX).contains(&pressure));

            let wind_speed = reading.extra["wind_speed"].as_f64().unwrap();
            assert!((0.0..=WIND_MAX).contains(&wind_speed));

            let direction = reading.extra["wind_direction"].as_i64().unwrap();
            assert!((0..360).contains(&direction));

            let gust = reading.extra["wind_gust"].as_f64().unwrap();
            assert!(gust + 1e-9 >= wind_speed);

            let rain = reading.extra["rain_rate"].as_f64().unwrap();
            assert!((0.0..=5.0).contains(&rain));

            let uv = reading.extra["uv_index"].as_f64().unwrap();
            assert!((0.0..=11.0).contains(&uv));
        }
    }
}
