use crate::models::common::*;

/// ワールドストアに格納される全エンティティの基本インターフェース
pub trait IEntity {
    /// エンティティIDの取得
    fn get_id(&self) -> uuid::Uuid;

    /// 所有者IDの取得
    fn get_owner(&self) -> OwnerId;

    /// 現在位置の取得
    fn get_position(&self) -> Position3D;

    /// 改訂番号の取得（コマンドによる変更ごとに増加）
    fn revision(&self) -> u64;

    /// コマンドによる変更を記録
    fn touch(&mut self);

    /// 指定所有者のエンティティかどうか
    fn is_owned_by(&self, owner: OwnerId) -> bool {
        self.get_owner() == owner
    }
}

/// ソナーで探知され得るエンティティのインターフェース
pub trait ISonarTarget: IEntity {
    /// 放射雑音の元になる速力（m/s）
    fn radiated_speed(&self) -> f64;

    /// シュノーケル航行中かどうか（雑音・反響が大きくなる）
    fn is_snorkeling(&self) -> bool;

    /// 生存しているかどうか
    fn is_alive(&self) -> bool;
}
