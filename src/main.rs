fn main() -> anyhow::Result<()> {
    laundry_desk_lib::run()
}
