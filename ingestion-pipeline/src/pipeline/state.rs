use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Ready,
    states: [Ready, ContentPrepared, Chunked, Embedded, Persisted, Failed],
    events {
        prepare { transition: { from: Ready, to: ContentPrepared } }
        chunk { transition: { from: ContentPrepared, to: Chunked } }
        embed { transition: { from: Chunked, to: Embedded } }
        persist { transition: { from: Embedded, to: Persisted } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: ContentPrepared, to: Failed }
            transition: { from: Chunked, to: Failed }
            transition: { from: Embedded, to: Failed }
            transition: { from: Persisted, to: Failed }
        }
    }
}

pub fn ready() -> IngestionMachine<(), Ready> {
    IngestionMachine::new(())
}
