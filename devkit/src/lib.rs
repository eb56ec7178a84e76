/*!
# Climate DevKit - test doubles and helpers

Shared by the simulator and collector test suites:
- In-memory [`Transport`](climate_shared::Transport) that needs no broker
- Builders for wire-format payloads
- A harness with waits and assertions on published messages
*/

pub mod mqtt_stub;
pub mod test_utils;

pub use mqtt_stub::{ClimateMessageBuilder, MockMessage, MockTransport};
pub use test_utils::TestHarness;
