/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */
use agentry::prelude::*;

// request sent by clients to a doubling server
#[agentry_message]
pub struct RequestMsg {
    pub x: i64,
}

// the server's answer: y = 2x + 1
#[agentry_message]
pub struct ResponseMsg {
    pub x: i64,
    pub y: i64,
}

#[agentry_message(class = "Noise")]
pub struct NuisanceMsg {
    pub level: u8,
}
