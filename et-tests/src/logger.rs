struct Logger;

impl log::Log for Logger {
    fn enabled(&self, _: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        cortex_m_semihosting::heprintln!(
            "[{level:5} {target}] {args}",
            level = record.level(),
            target = record.target(),
            args = record.args()
        );
    }

    fn flush(&self) {}
}

pub fn init() {
    // Safety: called once from `main` before any thread or interrupt runs
    unsafe { log::set_logger_racy(&Logger).unwrap() };
    log::set_max_level(log::LevelFilter::Info);
}
