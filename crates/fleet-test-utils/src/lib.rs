// fleet-test-utils: Mock servers for gateway integration tests.
//
// Each test spins up its own isolated instances on 127.0.0.1:0.

pub mod mock_directory;
pub mod mock_stream_server;

pub use mock_directory::MockDirectoryServer;
pub use mock_stream_server::{ConnectionRecord, MockStreamServer, ScriptStep};
