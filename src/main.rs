fn main() {
    reading_telemetry_lib::run()
}
